//! Job Query Handlers

use std::sync::Arc;

use crate::application::error::ApplicationError;
use crate::application::ports::JobStorePort;
use crate::application::queries::{GetArchitecture, GetJob, ListJobs};
use crate::domain::book::{Architecture, GenerationJob, UsageMetrics};

/// 任务详情（含累计用量）
#[derive(Debug, Clone)]
pub struct JobView {
    pub job: GenerationJob,
    pub usage: UsageMetrics,
    pub chunks_done: usize,
}

/// GetJob Handler
pub struct GetJobHandler {
    job_store: Arc<dyn JobStorePort>,
}

impl GetJobHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>) -> Self {
        Self { job_store }
    }

    pub async fn handle(&self, query: GetJob) -> Result<JobView, ApplicationError> {
        let job = self
            .job_store
            .get(query.job_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Job", query.job_id))?;
        let usage = self.job_store.get_usage(query.job_id).await?;
        let chunks_done = self.job_store.chunks_for_job(query.job_id).await?.len();

        Ok(JobView {
            job,
            usage,
            chunks_done,
        })
    }
}

/// ListJobs Handler
pub struct ListJobsHandler {
    job_store: Arc<dyn JobStorePort>,
}

impl ListJobsHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>) -> Self {
        Self { job_store }
    }

    pub async fn handle(&self, query: ListJobs) -> Result<Vec<GenerationJob>, ApplicationError> {
        Ok(self.job_store.list_by_user(&query.user_id).await?)
    }
}

/// GetArchitecture Handler - 供用户审阅当前大纲
pub struct GetArchitectureHandler {
    job_store: Arc<dyn JobStorePort>,
}

impl GetArchitectureHandler {
    pub fn new(job_store: Arc<dyn JobStorePort>) -> Self {
        Self { job_store }
    }

    pub async fn handle(&self, query: GetArchitecture) -> Result<Architecture, ApplicationError> {
        self.job_store
            .latest_architecture(query.job_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Architecture", query.job_id))
    }
}
