//! Data Transfer Objects

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::JobView;
use crate::domain::book::{Architecture, BookParams, GenerationJob};

// ============================================================================
// 统一响应结构
// ============================================================================

/// 统一 API 响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub errno: i32,
    pub error: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// 成功响应
    pub fn success(data: T) -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(data),
        }
    }
}

/// 空数据响应
#[derive(Debug, Serialize)]
pub struct Empty {}

impl ApiResponse<Empty> {
    /// 成功但无数据
    pub fn ok() -> Self {
        Self {
            errno: 0,
            error: String::new(),
            data: Some(Empty {}),
        }
    }
}

// ============================================================================
// Job DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub user_id: String,
    pub params: BookParams,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct GetJobRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ApproveJobRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateJobRequest {
    pub job_id: Uuid,
    /// 哪里不满意
    pub dislike: String,
    /// 希望怎么改
    pub change: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelJobRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobSummaryResponse {
    pub job_id: Uuid,
    pub title: String,
    pub status: String,
    pub target_pages: u32,
    pub created_at: String,
}

impl From<&GenerationJob> for JobSummaryResponse {
    fn from(job: &GenerationJob) -> Self {
        Self {
            job_id: *job.id().as_uuid(),
            title: job.params().title.clone(),
            status: job.status().as_str().to_string(),
            target_pages: job.params().target_pages,
            created_at: job.created_at().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub kind: String,
    pub message: String,
    pub phase: String,
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    pub job_id: Uuid,
    pub user_id: String,
    pub status: String,
    pub phase_message: String,
    pub params: BookParams,
    pub retry_count: u32,
    pub chunks_done: usize,
    pub page_shortfall: Option<f64>,
    pub error: Option<JobErrorResponse>,
    pub usage: UsageResponse,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<JobView> for JobDetailResponse {
    fn from(view: JobView) -> Self {
        let job = &view.job;
        Self {
            job_id: *job.id().as_uuid(),
            user_id: job.user_id().to_string(),
            status: job.status().as_str().to_string(),
            phase_message: job.status().phase_message().to_string(),
            params: job.params().clone(),
            retry_count: job.retry_count(),
            chunks_done: view.chunks_done,
            page_shortfall: job.page_shortfall(),
            error: job.error().map(|e| JobErrorResponse {
                kind: e.kind.clone(),
                message: e.message.clone(),
                phase: e.phase.clone(),
            }),
            usage: UsageResponse {
                prompt_tokens: view.usage.prompt_tokens,
                completion_tokens: view.usage.completion_tokens,
                reasoning_tokens: view.usage.reasoning_tokens,
                estimated_cost: view.usage.estimated_cost,
            },
            created_at: job.created_at().to_rfc3339(),
            started_at: job.started_at().map(|t| t.to_rfc3339()),
            completed_at: job.completed_at().map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChapterOutlineResponse {
    pub index: u32,
    pub title: String,
    pub target_pages: u32,
    pub summary: String,
    pub recurring_refs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ArchitectureResponse {
    pub architecture_id: Uuid,
    pub target_page_total: u32,
    pub chapters: Vec<ChapterOutlineResponse>,
    pub created_at: String,
}

impl From<Architecture> for ArchitectureResponse {
    fn from(architecture: Architecture) -> Self {
        Self {
            architecture_id: architecture.id,
            target_page_total: architecture.target_page_total,
            chapters: architecture
                .chapters
                .into_iter()
                .map(|c| ChapterOutlineResponse {
                    index: c.index,
                    title: c.title,
                    target_pages: c.target_pages,
                    summary: c.summary,
                    recurring_refs: c.recurring_refs,
                })
                .collect(),
            created_at: architecture.created_at.to_rfc3339(),
        }
    }
}
