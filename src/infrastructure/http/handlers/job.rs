//! Job Handlers

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::application::{
    ApproveArchitectureCommand, CancelJobCommand, GetArchitecture, GetJob, ListJobs,
    RegenerateArchitectureCommand, SubmitBookCommand,
};
use crate::application::ports::ArchitectureFeedback;
use crate::infrastructure::http::dto::{
    ApiResponse, ApproveJobRequest, ArchitectureResponse, CancelJobRequest, Empty, GetJobRequest,
    JobDetailResponse, JobSummaryResponse, ListJobsQuery, RegenerateJobRequest, SubmitJobRequest,
    SubmitJobResponse,
};
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

/// 提交生成任务
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<ApiResponse<SubmitJobResponse>>, ApiError> {
    let result = state
        .submit_handler
        .handle(SubmitBookCommand {
            user_id: req.user_id,
            params: req.params,
        })
        .await?;

    Ok(Json(ApiResponse::success(SubmitJobResponse {
        job_id: result.job_id,
        status: result.status.as_str().to_string(),
    })))
}

/// 查询任务详情（状态轮询入口）
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetJobRequest>,
) -> Result<Json<ApiResponse<JobDetailResponse>>, ApiError> {
    let view = state
        .get_job_handler
        .handle(GetJob { job_id: req.job_id })
        .await?;

    Ok(Json(ApiResponse::success(view.into())))
}

/// 列出用户的所有任务
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ApiResponse<Vec<JobSummaryResponse>>>, ApiError> {
    let jobs = state
        .list_jobs_handler
        .handle(ListJobs {
            user_id: query.user_id,
        })
        .await?;

    Ok(Json(ApiResponse::success(
        jobs.iter().map(JobSummaryResponse::from).collect(),
    )))
}

/// 获取当前大纲（供用户审阅）
pub async fn get_architecture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GetJobRequest>,
) -> Result<Json<ApiResponse<ArchitectureResponse>>, ApiError> {
    let architecture = state
        .get_architecture_handler
        .handle(GetArchitecture { job_id: req.job_id })
        .await?;

    Ok(Json(ApiResponse::success(architecture.into())))
}

/// 确认大纲，进入全书生成
pub async fn approve_architecture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApproveJobRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    state
        .approve_handler
        .handle(ApproveArchitectureCommand { job_id: req.job_id })
        .await?;

    Ok(Json(ApiResponse::ok()))
}

/// 带反馈重生成大纲
pub async fn regenerate_architecture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegenerateJobRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    state
        .regenerate_handler
        .handle(RegenerateArchitectureCommand {
            job_id: req.job_id,
            feedback: ArchitectureFeedback {
                dislike: req.dislike,
                change: req.change,
            },
        })
        .await?;

    Ok(Json(ApiResponse::ok()))
}

/// 取消任务
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelJobRequest>,
) -> Result<Json<ApiResponse<Empty>>, ApiError> {
    state
        .cancel_handler
        .handle(CancelJobCommand { job_id: req.job_id })
        .await?;

    Ok(Json(ApiResponse::ok()))
}
