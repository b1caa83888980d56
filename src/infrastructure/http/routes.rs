//! HTTP Routes
//!
//! API Endpoints:
//! - /api/job/submit        POST  提交生成任务（入队大纲阶段）
//! - /api/job/get           POST  查询任务详情（状态轮询）
//! - /api/job/list          GET   列出用户的任务
//! - /api/job/architecture  POST  获取当前大纲（供审阅）
//! - /api/job/approve       POST  确认大纲，进入全书生成
//! - /api/job/regenerate    POST  带反馈重生成大纲
//! - /api/job/cancel        POST  取消任务
//! - /api/ping              GET   健康检查
//! - /ws/job/{job_id}       WS    任务进度事件
//! - /ws/events             WS    全局进度事件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws/job/:job_id", get(handlers::job_websocket_handler))
        .route("/ws/events", get(handlers::global_websocket_handler))
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/job", job_routes())
}

/// Job 路由
fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submit", post(handlers::submit_job))
        .route("/get", post(handlers::get_job))
        .route("/list", get(handlers::list_jobs))
        .route("/architecture", post(handlers::get_architecture))
        .route("/approve", post(handlers::approve_architecture))
        .route("/regenerate", post(handlers::regenerate_architecture))
        .route("/cancel", post(handlers::cancel_job))
}
