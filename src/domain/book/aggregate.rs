//! Book Context - Aggregate Root

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookError, BookParams, JobFailure, JobId, JobStatus};

/// GenerationJob 聚合根
///
/// 不变量:
/// - 状态只能前进，不能回退（终态后不可再迁移）
/// - 任务从不删除，只标记终态
/// - 所有修改经过定义好的迁移方法
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    id: JobId,
    user_id: String,
    status: JobStatus,
    params: BookParams,
    /// 瞬态错误重试的累计次数（跨所有阶段）
    retry_count: u32,
    /// 终态失败的结构化错误
    error: Option<JobFailure>,
    /// 扩写耗尽后仍未达标的页数缺口（非致命）
    page_shortfall: Option<f64>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// 创建新任务，初始状态 queued
    pub fn new(user_id: impl Into<String>, params: BookParams) -> Result<Self, BookError> {
        params.validate()?;
        Ok(Self {
            id: JobId::new(),
            user_id: user_id.into(),
            status: JobStatus::Queued,
            params,
            retry_count: 0,
            error: None,
            page_shortfall: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    /// 从持久化字段重建（不经过参数校验）
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: JobId,
        user_id: String,
        status: JobStatus,
        params: BookParams,
        retry_count: u32,
        error: Option<JobFailure>,
        page_shortfall: Option<f64>,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            user_id,
            status,
            params,
            retry_count,
            error,
            page_shortfall,
            created_at,
            started_at,
            completed_at,
        }
    }

    /// 状态迁移
    ///
    /// 迁移到当前状态视为幂等（返回 Ok 但不修改时间戳），
    /// 回退或从终态迁出返回错误。
    pub fn transition_to(&mut self, next: JobStatus) -> Result<(), BookError> {
        if next == self.status {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(BookError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if self.started_at.is_none() && next == JobStatus::Architecture {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// 记录致命失败并迁移到 failed
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), BookError> {
        self.transition_to(JobStatus::Failed)?;
        self.error = Some(failure);
        Ok(())
    }

    /// 记录页数缺口（非致命，任务仍可完成）
    pub fn record_shortfall(&mut self, shortfall_pages: f64) {
        self.page_shortfall = Some(shortfall_pages);
    }

    /// 累加重试次数
    pub fn add_retries(&mut self, count: u32) {
        self.retry_count += count;
    }

    // Getters
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn params(&self) -> &BookParams {
        &self.params
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn page_shortfall(&self) -> Option<f64> {
        self.page_shortfall
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job() -> GenerationJob {
        GenerationJob::new(
            "user-1",
            BookParams {
                title: "测试书籍".to_string(),
                genre: "fiction".to_string(),
                audience: "general".to_string(),
                tone: "casual".to_string(),
                topics: vec![],
                target_pages: 80,
                target_chapters: 12,
                language: "en".to_string(),
                format_hints: vec![],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let mut job = new_job();
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.started_at().is_none());

        job.transition_to(JobStatus::Architecture).unwrap();
        assert!(job.started_at().is_some());

        job.transition_to(JobStatus::AwaitingApproval).unwrap();
        job.transition_to(JobStatus::Generating).unwrap();
        job.transition_to(JobStatus::Reconciling).unwrap();
        job.transition_to(JobStatus::Completed).unwrap();

        assert!(job.completed_at().is_some());
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut job = new_job();
        job.transition_to(JobStatus::Architecture).unwrap();
        job.transition_to(JobStatus::AwaitingApproval).unwrap();

        let err = job.transition_to(JobStatus::Queued);
        assert!(matches!(err, Err(BookError::InvalidTransition { .. })));
        assert_eq!(job.status(), JobStatus::AwaitingApproval);
    }

    #[test]
    fn test_same_status_is_idempotent() {
        let mut job = new_job();
        job.transition_to(JobStatus::Architecture).unwrap();
        let started = job.started_at();

        // 重复迁移不报错、不改时间戳（worker 崩溃后重放是安全的）
        job.transition_to(JobStatus::Architecture).unwrap();
        assert_eq!(job.started_at(), started);
    }

    #[test]
    fn test_terminal_locks_job() {
        let mut job = new_job();
        job.transition_to(JobStatus::Cancelled).unwrap();
        assert!(job.transition_to(JobStatus::Generating).is_err());
        assert!(job.transition_to(JobStatus::Failed).is_err());
    }

    #[test]
    fn test_fail_records_payload() {
        let mut job = new_job();
        job.transition_to(JobStatus::Architecture).unwrap();
        job.fail(JobFailure::new(
            "authentication",
            "invalid api key",
            "architecture",
        ))
        .unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error().unwrap().kind, "authentication");
    }

    #[test]
    fn test_invalid_params_rejected() {
        let result = GenerationJob::new(
            "user-1",
            BookParams {
                title: String::new(),
                genre: "fiction".to_string(),
                audience: "general".to_string(),
                tone: "casual".to_string(),
                topics: vec![],
                target_pages: 80,
                target_chapters: 12,
                language: "en".to_string(),
                format_hints: vec![],
            },
        );
        assert!(result.is_err());
    }
}
