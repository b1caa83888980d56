//! Job Queries - 任务查询定义

use uuid::Uuid;

/// 查询单个任务
#[derive(Debug, Clone)]
pub struct GetJob {
    pub job_id: Uuid,
}

/// 查询用户的所有任务
#[derive(Debug, Clone)]
pub struct ListJobs {
    pub user_id: String,
}

/// 查询任务的当前大纲
#[derive(Debug, Clone)]
pub struct GetArchitecture {
    pub job_id: Uuid,
}
