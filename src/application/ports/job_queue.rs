//! Job Queue Port - 优先级任务队列与准入控制
//!
//! 调度器从优先级分区队列拉取工作单元：优先级高者先出，同优先级 FIFO。
//! 超过滚动窗口限额的任务延迟重新入队，而不是失败。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 队列优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    /// 大纲类工作（交互等待中，优先处理）
    High,
    /// 全书生成
    Normal,
    /// 附属通知类工作
    Low,
}

impl JobPriority {
    pub fn lane(&self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }
}

/// 大纲重生成的用户反馈
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArchitectureFeedback {
    /// 哪里不满意
    pub dislike: String,
    /// 希望怎么改
    pub change: String,
}

/// 工作单元
#[derive(Debug, Clone)]
pub enum QueuedWork {
    /// 初次大纲生成
    Architecture { job_id: Uuid },
    /// 带反馈的大纲重生成（状态保持 awaiting_approval）
    Regeneration {
        job_id: Uuid,
        feedback: ArchitectureFeedback,
    },
    /// 确认后的全书生成（分块 + 校验）
    FullGeneration { job_id: Uuid },
    /// 附属通知（低优先级）
    Notification { job_id: Uuid, message: String },
}

impl QueuedWork {
    pub fn job_id(&self) -> Uuid {
        match self {
            QueuedWork::Architecture { job_id }
            | QueuedWork::Regeneration { job_id, .. }
            | QueuedWork::FullGeneration { job_id }
            | QueuedWork::Notification { job_id, .. } => *job_id,
        }
    }

    /// 工作单元的默认队列优先级
    pub fn priority(&self) -> JobPriority {
        match self {
            QueuedWork::Architecture { .. } | QueuedWork::Regeneration { .. } => JobPriority::High,
            QueuedWork::FullGeneration { .. } => JobPriority::Normal,
            QueuedWork::Notification { .. } => JobPriority::Low,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            QueuedWork::Architecture { .. } => "architecture",
            QueuedWork::Regeneration { .. } => "regeneration",
            QueuedWork::FullGeneration { .. } => "full_generation",
            QueuedWork::Notification { .. } => "notification",
        }
    }
}

/// Job Queue Port
#[async_trait]
pub trait JobQueuePort: Send + Sync {
    /// 入队
    async fn push(&self, work: QueuedWork, priority: JobPriority);

    /// 延迟入队（限流/熔断时的重排）
    async fn push_delayed(&self, work: QueuedWork, priority: JobPriority, delay: Duration);

    /// 出队（优先级优先，同优先级 FIFO）；队列关闭后返回 None
    async fn pop(&self) -> Option<QueuedWork>;

    /// 当前排队的工作单元总数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 准入类别（分别限额）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionKind {
    Architecture,
    FullGeneration,
}

impl AdmissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionKind::Architecture => "architecture",
            AdmissionKind::FullGeneration => "full_generation",
        }
    }
}

/// 超过限额
#[derive(Debug, Error)]
#[error("rate limit exceeded for {kind}, retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    pub kind: &'static str,
    pub retry_after: Duration,
}

/// Rate Limiter Port - 按用户的滚动窗口准入控制
pub trait RateLimiterPort: Send + Sync {
    /// 尝试获取准入额度；超限时返回建议的等待时长
    fn try_acquire(&self, user_id: &str, kind: AdmissionKind) -> Result<(), RateLimitExceeded>;
}
