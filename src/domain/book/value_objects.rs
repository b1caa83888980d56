//! Book Context - Value Objects

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 生成任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 任务状态
///
/// 状态机只允许前进，禁止回退：
/// queued → architecture → awaiting_approval → generating → reconciling
/// → completed | failed | cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 已入队，等待调度
    Queued,
    /// 正在生成大纲
    Architecture,
    /// 大纲就绪，等待用户确认
    AwaitingApproval,
    /// 正在分块生成正文
    Generating,
    /// 正在校验/修复
    Reconciling,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
    /// 已取消
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Architecture => "architecture",
            JobStatus::AwaitingApproval => "awaiting_approval",
            JobStatus::Generating => "generating",
            JobStatus::Reconciling => "reconciling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "architecture" => Some(JobStatus::Architecture),
            "awaiting_approval" => Some(JobStatus::AwaitingApproval),
            "generating" => Some(JobStatus::Generating),
            "reconciling" => Some(JobStatus::Reconciling),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// 状态序号，用于禁止回退的校验
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Architecture => 1,
            JobStatus::AwaitingApproval => 2,
            JobStatus::Generating => 3,
            JobStatus::Reconciling => 4,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 5,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 校验状态迁移是否合法（只允许前进，终态不可再迁移）
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    /// 进度事件使用的人类可读阶段描述
    pub fn phase_message(&self) -> &'static str {
        match self {
            JobStatus::Queued => "Waiting in queue",
            JobStatus::Architecture => "Designing book architecture",
            JobStatus::AwaitingApproval => "Architecture ready, awaiting approval",
            JobStatus::Generating => "Writing chapters",
            JobStatus::Reconciling => "Assembling final manuscript",
            JobStatus::Completed => "Book completed",
            JobStatus::Failed => "Generation failed",
            JobStatus::Cancelled => "Generation cancelled",
        }
    }
}

/// 书籍生成参数（用户输入，提交后不可变）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookParams {
    pub title: String,
    pub genre: String,
    pub audience: String,
    pub tone: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub target_pages: u32,
    pub target_chapters: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub format_hints: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl BookParams {
    /// 参数校验
    pub fn validate(&self) -> Result<(), super::BookError> {
        if self.title.is_empty() {
            return Err(super::BookError::InvalidParams("标题不能为空".into()));
        }
        if self.title.chars().count() > 200 {
            return Err(super::BookError::InvalidParams(
                "标题长度不能超过200字符".into(),
            ));
        }
        if self.target_pages == 0 || self.target_pages > 2000 {
            return Err(super::BookError::InvalidParams(
                "目标页数必须在 1-2000 之间".into(),
            ));
        }
        if self.target_chapters == 0 || self.target_chapters > 100 {
            return Err(super::BookError::InvalidParams(
                "目标章节数必须在 1-100 之间".into(),
            ));
        }
        if self.target_chapters > self.target_pages {
            return Err(super::BookError::InvalidParams(
                "章节数不能超过页数".into(),
            ));
        }
        Ok(())
    }
}

/// Token 用量累计（含成本估算）
///
/// 不变量：只增不减。所有阶段（大纲、重生成、分块、扩写）的用量
/// 通过 `add` 累加，禁止覆盖。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub estimated_cost: f64,
}

impl UsageMetrics {
    /// 累加另一份用量
    pub fn add(&mut self, other: &UsageMetrics) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.estimated_cost += other.estimated_cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens + self.reasoning_tokens
    }
}

/// 任务失败的结构化描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    /// 错误类别（如 "authentication", "architecture_parse", "timeout"）
    pub kind: String,
    /// 人类可读的错误信息
    pub message: String,
    /// 失败发生的阶段
    pub phase: String,
}

impl JobFailure {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            phase: phase.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BookParams {
        BookParams {
            title: "深海之下".to_string(),
            genre: "science".to_string(),
            audience: "general".to_string(),
            tone: "accessible".to_string(),
            topics: vec!["oceanography".to_string()],
            target_pages: 80,
            target_chapters: 12,
            language: "en".to_string(),
            format_hints: vec![],
        }
    }

    #[test]
    fn test_status_forward_only() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Architecture));
        assert!(JobStatus::Architecture.can_transition_to(JobStatus::AwaitingApproval));
        assert!(JobStatus::AwaitingApproval.can_transition_to(JobStatus::Generating));
        assert!(JobStatus::Generating.can_transition_to(JobStatus::Reconciling));
        assert!(JobStatus::Reconciling.can_transition_to(JobStatus::Completed));

        // 回退被拒绝
        assert!(!JobStatus::Generating.can_transition_to(JobStatus::AwaitingApproval));
        assert!(!JobStatus::AwaitingApproval.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Reconciling.can_transition_to(JobStatus::Generating));
    }

    #[test]
    fn test_status_skip_forward_allowed() {
        // 取消可以从任意非终态直接跳到终态
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Generating.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_terminal_is_final() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Architecture,
            JobStatus::AwaitingApproval,
            JobStatus::Generating,
            JobStatus::Reconciling,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_str("unknown"), None);
    }

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());

        let mut p = params();
        p.title = String::new();
        assert!(p.validate().is_err());

        let mut p = params();
        p.target_pages = 0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.target_chapters = 200;
        assert!(p.validate().is_err());

        let mut p = params();
        p.target_chapters = 90;
        p.target_pages = 50;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut usage = UsageMetrics::default();
        usage.add(&UsageMetrics {
            prompt_tokens: 100,
            completion_tokens: 500,
            reasoning_tokens: 50,
            estimated_cost: 0.02,
        });
        usage.add(&UsageMetrics {
            prompt_tokens: 200,
            completion_tokens: 1000,
            reasoning_tokens: 0,
            estimated_cost: 0.05,
        });

        assert_eq!(usage.prompt_tokens, 300);
        assert_eq!(usage.completion_tokens, 1500);
        assert_eq!(usage.reasoning_tokens, 50);
        assert!((usage.estimated_cost - 0.07).abs() < 1e-9);
        assert_eq!(usage.total_tokens(), 1850);
    }
}
