//! Book Context - 书籍生成限界上下文
//!
//! 职责:
//! - GenerationJob 聚合管理（状态机、重试计数、终态标记）
//! - Architecture 大纲实体
//! - ChunkResult 分块结果实体

mod aggregate;
mod entities;
mod errors;
mod value_objects;

pub use aggregate::GenerationJob;
pub use entities::{Architecture, ChapterOutline, ChunkResult, RecurringElement, SpecialSection};
pub use errors::BookError;
pub use value_objects::{BookParams, JobFailure, JobId, JobStatus, UsageMetrics};
