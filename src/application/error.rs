//! 应用层错误定义
//!
//! 统一的命令/查询错误类型

use thiserror::Error;
use uuid::Uuid;

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: Uuid,
    },

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 状态无效（如在错误的状态下执行确认/重生成）
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// 仓储错误
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// 外部服务错误
    #[error("External service error: {0}")]
    ExternalServiceError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApplicationError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: Uuid) -> Self {
        Self::NotFound { resource_type, id }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// 创建状态无效错误
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}

impl From<crate::application::ports::JobStoreError> for ApplicationError {
    fn from(err: crate::application::ports::JobStoreError) -> Self {
        use crate::application::ports::JobStoreError;
        match err {
            JobStoreError::NotFound(id) => Self::not_found("Job", id),
            JobStoreError::InvalidTransition { from, to, .. } => {
                Self::InvalidState(format!("illegal status transition: {} -> {}", from, to))
            }
            other => Self::RepositoryError(other.to_string()),
        }
    }
}

impl From<crate::domain::book::BookError> for ApplicationError {
    fn from(err: crate::domain::book::BookError) -> Self {
        Self::ValidationError(err.to_string())
    }
}
