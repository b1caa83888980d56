//! Command Handlers

mod job_handlers;

pub use job_handlers::{
    ApproveArchitectureHandler, CancelJobHandler, RegenerateArchitectureHandler, SubmitBookHandler,
    SubmitBookResponse,
};
