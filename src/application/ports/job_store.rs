//! Job Store Port - 任务记录存储
//!
//! 任务状态的唯一事实来源。状态更新走幂等的 read-modify-write 迁移
//! （worker 崩溃后重放是安全的），用量只做加法累计。

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::book::{Architecture, ChunkResult, GenerationJob, JobFailure, JobStatus, UsageMetrics};

/// Job Store 错误
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Duplicate job: {0}")]
    Duplicate(Uuid),

    #[error("Invalid status transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Job Store Port
///
/// 通用键寻址存储：create / get / update_status（幂等）/ append_usage（累加）
#[async_trait]
pub trait JobStorePort: Send + Sync {
    /// 保存新任务
    async fn create(&self, job: &GenerationJob) -> Result<(), JobStoreError>;

    /// 根据 ID 查找任务
    async fn get(&self, job_id: Uuid) -> Result<Option<GenerationJob>, JobStoreError>;

    /// 获取用户的所有任务（按创建时间倒序）
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<GenerationJob>, JobStoreError>;

    /// 状态迁移（幂等）
    ///
    /// 返回 true 表示本次调用完成了迁移，false 表示任务已处于该状态
    /// （重复上报终态时用于保证恰好一次的对外通知）。
    /// 回退迁移返回 `InvalidTransition`。
    async fn update_status(&self, job_id: Uuid, status: JobStatus) -> Result<bool, JobStoreError>;

    /// 记录致命失败并迁移到 failed
    async fn record_failure(&self, job_id: Uuid, failure: &JobFailure)
        -> Result<bool, JobStoreError>;

    /// 记录页数缺口（非致命标记）
    async fn record_shortfall(&self, job_id: Uuid, shortfall_pages: f64)
        -> Result<(), JobStoreError>;

    /// 累加重试次数
    async fn add_retries(&self, job_id: Uuid, count: u32) -> Result<(), JobStoreError>;

    /// 累加用量（只增不减）
    async fn append_usage(&self, job_id: Uuid, usage: &UsageMetrics) -> Result<(), JobStoreError>;

    /// 读取累计用量
    async fn get_usage(&self, job_id: Uuid) -> Result<UsageMetrics, JobStoreError>;

    /// 保存大纲（重生成时新增一行，历史保留）
    async fn save_architecture(
        &self,
        job_id: Uuid,
        architecture: &Architecture,
    ) -> Result<(), JobStoreError>;

    /// 读取最新大纲
    async fn latest_architecture(
        &self,
        job_id: Uuid,
    ) -> Result<Option<Architecture>, JobStoreError>;

    /// 保存分块结果（同块幂等覆盖，支持续跑）
    async fn save_chunk(&self, job_id: Uuid, chunk: &ChunkResult) -> Result<(), JobStoreError>;

    /// 按分块顺序读取任务的所有分块结果
    async fn chunks_for_job(&self, job_id: Uuid) -> Result<Vec<ChunkResult>, JobStoreError>;
}
