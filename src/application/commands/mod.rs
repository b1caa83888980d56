//! Application Commands - CQRS 命令

pub mod handlers;

mod job_commands;

pub use job_commands::{
    ApproveArchitectureCommand, CancelJobCommand, RegenerateArchitectureCommand, SubmitBookCommand,
};
