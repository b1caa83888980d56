//! Job Command Handlers

use std::sync::Arc;
use uuid::Uuid;

use crate::application::commands::{
    ApproveArchitectureCommand, CancelJobCommand, RegenerateArchitectureCommand, SubmitBookCommand,
};
use crate::application::error::ApplicationError;
use crate::application::ports::{
    JobPriority, JobQueuePort, JobStorePort, ProgressEvent, ProgressSinkPort, QueuedWork,
};
use crate::domain::book::{GenerationJob, JobStatus};

// ============================================================================
// SubmitBook
// ============================================================================

/// 提交响应
#[derive(Debug, Clone)]
pub struct SubmitBookResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// SubmitBook Handler - 创建任务记录并入队大纲阶段
pub struct SubmitBookHandler {
    job_store: Arc<dyn JobStorePort>,
    job_queue: Arc<dyn JobQueuePort>,
}

impl SubmitBookHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>, job_queue: Arc<dyn JobQueuePort>) -> Self {
        Self {
            job_store,
            job_queue,
        }
    }

    pub async fn handle(
        &self,
        command: SubmitBookCommand,
    ) -> Result<SubmitBookResponse, ApplicationError> {
        let job = GenerationJob::new(command.user_id, command.params)?;
        let job_id = *job.id().as_uuid();

        self.job_store.create(&job).await?;

        self.job_queue
            .push(QueuedWork::Architecture { job_id }, JobPriority::High)
            .await;

        tracing::info!(
            job_id = %job_id,
            user_id = %job.user_id(),
            target_pages = job.params().target_pages,
            target_chapters = job.params().target_chapters,
            "Generation job submitted"
        );

        Ok(SubmitBookResponse {
            job_id,
            status: job.status(),
        })
    }
}

// ============================================================================
// ApproveArchitecture
// ============================================================================

/// ApproveArchitecture Handler - awaiting_approval → generating，入队全书生成
pub struct ApproveArchitectureHandler {
    job_store: Arc<dyn JobStorePort>,
    job_queue: Arc<dyn JobQueuePort>,
}

impl ApproveArchitectureHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>, job_queue: Arc<dyn JobQueuePort>) -> Self {
        Self {
            job_store,
            job_queue,
        }
    }

    pub async fn handle(&self, command: ApproveArchitectureCommand) -> Result<(), ApplicationError> {
        let job = self
            .job_store
            .get(command.job_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Job", command.job_id))?;

        if job.status() != JobStatus::AwaitingApproval {
            return Err(ApplicationError::invalid_state(format!(
                "job is {}, approval requires awaiting_approval",
                job.status().as_str()
            )));
        }
        if self
            .job_store
            .latest_architecture(command.job_id)
            .await?
            .is_none()
        {
            return Err(ApplicationError::invalid_state(
                "job has no architecture to approve".to_string(),
            ));
        }

        // 大纲确认后不可再变（进入 generating 即冻结）
        self.job_store
            .update_status(command.job_id, JobStatus::Generating)
            .await?;

        self.job_queue
            .push(
                QueuedWork::FullGeneration {
                    job_id: command.job_id,
                },
                JobPriority::Normal,
            )
            .await;

        tracing::info!(job_id = %command.job_id, "Architecture approved, full generation queued");
        Ok(())
    }
}

// ============================================================================
// RegenerateArchitecture
// ============================================================================

/// RegenerateArchitecture Handler - 带反馈重新入队大纲阶段
///
/// 重生成次数不设上限；任务状态保持 awaiting_approval（不回退）。
pub struct RegenerateArchitectureHandler {
    job_store: Arc<dyn JobStorePort>,
    job_queue: Arc<dyn JobQueuePort>,
}

impl RegenerateArchitectureHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>, job_queue: Arc<dyn JobQueuePort>) -> Self {
        Self {
            job_store,
            job_queue,
        }
    }

    pub async fn handle(
        &self,
        command: RegenerateArchitectureCommand,
    ) -> Result<(), ApplicationError> {
        let job = self
            .job_store
            .get(command.job_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Job", command.job_id))?;

        if job.status() != JobStatus::AwaitingApproval {
            return Err(ApplicationError::invalid_state(format!(
                "job is {}, regeneration requires awaiting_approval",
                job.status().as_str()
            )));
        }

        self.job_queue
            .push(
                QueuedWork::Regeneration {
                    job_id: command.job_id,
                    feedback: command.feedback,
                },
                JobPriority::High,
            )
            .await;

        tracing::info!(job_id = %command.job_id, "Architecture regeneration queued");
        Ok(())
    }
}

// ============================================================================
// CancelJob
// ============================================================================

/// CancelJob Handler - 标记取消，worker 在阶段边界检查并放弃
pub struct CancelJobHandler {
    job_store: Arc<dyn JobStorePort>,
    progress_sink: Arc<dyn ProgressSinkPort>,
}

impl CancelJobHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>, progress_sink: Arc<dyn ProgressSinkPort>) -> Self {
        Self {
            job_store,
            progress_sink,
        }
    }

    pub async fn handle(&self, command: CancelJobCommand) -> Result<(), ApplicationError> {
        let job = self
            .job_store
            .get(command.job_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Job", command.job_id))?;

        if job.status().is_terminal() {
            return Err(ApplicationError::invalid_state(format!(
                "job already terminal: {}",
                job.status().as_str()
            )));
        }

        let applied = self
            .job_store
            .update_status(command.job_id, JobStatus::Cancelled)
            .await?;

        if applied {
            self.progress_sink.publish(ProgressEvent::new(
                command.job_id,
                JobStatus::Cancelled.as_str(),
                100,
                JobStatus::Cancelled.phase_message(),
            ));
            tracing::info!(job_id = %command.job_id, "Job cancelled");
        }

        Ok(())
    }
}
