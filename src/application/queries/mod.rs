//! Application Queries - CQRS 查询

pub mod handlers;

mod job_queries;

pub use job_queries::{GetArchitecture, GetJob, ListJobs};
