//! Book Context - Errors

use thiserror::Error;

use super::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum BookError {
    #[error("任务不存在: {0}")]
    NotFound(JobId),

    #[error("无效的生成参数: {0}")]
    InvalidParams(String),

    #[error("非法的状态迁移: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("任务已处于终态: {0:?}")]
    AlreadyTerminal(JobStatus),

    #[error("大纲缺失或尚未生成")]
    MissingArchitecture,
}
