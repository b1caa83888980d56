//! Application State
//!
//! 包含所有 Command/Query Handlers 的应用状态

use std::sync::Arc;

use crate::application::{
    // Command handlers
    ApproveArchitectureHandler, CancelJobHandler, RegenerateArchitectureHandler, SubmitBookHandler,
    // Query handlers
    GetArchitectureHandler, GetJobHandler, ListJobsHandler,
    // Ports
    ports::{JobQueuePort, JobStorePort, ProgressSinkPort},
};
use crate::infrastructure::events::ProgressPublisher;

/// 应用状态
pub struct AppState {
    // ========== Ports ==========
    pub job_store: Arc<dyn JobStorePort>,
    pub job_queue: Arc<dyn JobQueuePort>,
    pub progress_publisher: Arc<ProgressPublisher>,

    // ========== Command Handlers ==========
    pub submit_handler: SubmitBookHandler,
    pub approve_handler: ApproveArchitectureHandler,
    pub regenerate_handler: RegenerateArchitectureHandler,
    pub cancel_handler: CancelJobHandler,

    // ========== Query Handlers ==========
    pub get_job_handler: GetJobHandler,
    pub list_jobs_handler: ListJobsHandler,
    pub get_architecture_handler: GetArchitectureHandler,
}

impl AppState {
    /// 创建应用状态
    pub fn new(
        job_store: Arc<dyn JobStorePort>,
        job_queue: Arc<dyn JobQueuePort>,
        progress_publisher: Arc<ProgressPublisher>,
    ) -> Self {
        let progress_sink: Arc<dyn ProgressSinkPort> = progress_publisher.clone();

        Self {
            // Command handlers
            submit_handler: SubmitBookHandler::new(job_store.clone(), job_queue.clone()),
            approve_handler: ApproveArchitectureHandler::new(job_store.clone(), job_queue.clone()),
            regenerate_handler: RegenerateArchitectureHandler::new(
                job_store.clone(),
                job_queue.clone(),
            ),
            cancel_handler: CancelJobHandler::new(job_store.clone(), progress_sink),

            // Query handlers
            get_job_handler: GetJobHandler::new(job_store.clone()),
            list_jobs_handler: ListJobsHandler::new(job_store.clone()),
            get_architecture_handler: GetArchitectureHandler::new(job_store.clone()),

            // Ports
            job_store,
            job_queue,
            progress_publisher,
        }
    }
}
