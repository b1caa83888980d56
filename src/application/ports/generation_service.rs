//! Generation Service Port - 流式文本生成服务抽象
//!
//! 定义外部生成服务必须满足的通用契约，具体实现在 infrastructure/adapters 层。
//! 适配器只负责把供应商协议归一化为 StreamEvent 序列，
//! 不做重试、不做持久化（重试属于 resilience 层）。

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// 供应商声明的错误类别，原样透传，不得吞掉
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// 服务过载
    Overloaded,
    /// 触发限流
    RateLimited,
    /// 请求超时
    Timeout,
    /// 请求本身非法
    InvalidRequest,
    /// 认证失败
    Authentication,
    /// 连接层故障
    Connection,
}

impl GenerationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationErrorKind::Overloaded => "overloaded",
            GenerationErrorKind::RateLimited => "rate_limited",
            GenerationErrorKind::Timeout => "timeout",
            GenerationErrorKind::InvalidRequest => "invalid_request",
            GenerationErrorKind::Authentication => "authentication",
            GenerationErrorKind::Connection => "connection",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "overloaded" => Some(GenerationErrorKind::Overloaded),
            "rate_limited" => Some(GenerationErrorKind::RateLimited),
            "timeout" => Some(GenerationErrorKind::Timeout),
            "invalid_request" => Some(GenerationErrorKind::InvalidRequest),
            "authentication" => Some(GenerationErrorKind::Authentication),
            "connection" => Some(GenerationErrorKind::Connection),
            _ => None,
        }
    }

    /// 瞬态错误可重试，永久错误立即上抛
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationErrorKind::Overloaded
                | GenerationErrorKind::RateLimited
                | GenerationErrorKind::Timeout
                | GenerationErrorKind::Connection
        )
    }
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成服务错误
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation service error ({kind}): {message}")]
    Service {
        kind: GenerationErrorKind,
        message: String,
    },

    /// 事件流在 Done 之前被关闭
    #[error("stream closed before completion")]
    StreamClosed,

    /// 软超时：连接仍在但长时间没有新事件
    #[error("no stream progress within {0} seconds")]
    Stalled(u64),
}

impl GenerationError {
    pub fn service(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self::Service {
            kind,
            message: message.into(),
        }
    }

    /// 错误类别（流中断和停滞按连接/超时归类）
    pub fn kind(&self) -> GenerationErrorKind {
        match self {
            GenerationError::Service { kind, .. } => *kind,
            GenerationError::StreamClosed => GenerationErrorKind::Connection,
            GenerationError::Stalled(_) => GenerationErrorKind::Timeout,
        }
    }
}

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 角色标注的消息
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 一次流式生成请求
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    /// 输出 token 预算
    pub max_output_tokens: u32,
    /// 推理 token 预算（0 表示关闭推理）
    pub reasoning_token_budget: u32,
}

/// Token 用量快照（供应商口径）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }
}

/// 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 正常结束
    EndTurn,
    /// 撞到输出 token 上限
    MaxTokens,
    /// 未知/未声明
    Unknown,
}

impl StopReason {
    pub fn from_str(s: &str) -> Self {
        match s {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            _ => StopReason::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::Unknown => "unknown",
        }
    }
}

/// 归一化的流式事件（封闭和类型，新增事件种类必须显式处理）
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Started,
    ReasoningStarted,
    ReasoningDelta(String),
    ReasoningStopped,
    TextStarted,
    TextDelta(String),
    TextStopped,
    UsageUpdate(TokenUsage),
    Error {
        kind: GenerationErrorKind,
        message: String,
    },
    Done {
        usage: TokenUsage,
        stop_reason: StopReason,
    },
}

/// 单消费者事件流
///
/// 惰性、有限、不可重放。消费点是挂起点，取消只在分块/阶段边界协作发生。
pub struct GenerationStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl GenerationStream {
    pub fn new(receiver: mpsc::Receiver<StreamEvent>) -> Self {
        Self { receiver }
    }

    /// 构造一个预置事件序列的流（测试用）
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // 容量 == 事件数，try_send 不会失败
            let _ = tx.try_send(event);
        }
        Self { receiver: rx }
    }

    /// 接收下一个事件，流结束返回 None
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

/// Generation Service Port
///
/// 外部流式文本生成服务的抽象接口
#[async_trait]
pub trait GenerationServicePort: Send + Sync {
    /// 发起一次流式生成调用
    async fn open_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationStream, GenerationError>;

    /// 检查生成服务是否可用
    async fn health_check(&self) -> bool {
        true // 默认实现
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_roundtrip() {
        for kind in [
            GenerationErrorKind::Overloaded,
            GenerationErrorKind::RateLimited,
            GenerationErrorKind::Timeout,
            GenerationErrorKind::InvalidRequest,
            GenerationErrorKind::Authentication,
            GenerationErrorKind::Connection,
        ] {
            assert_eq!(GenerationErrorKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(GenerationErrorKind::Overloaded.is_transient());
        assert!(GenerationErrorKind::RateLimited.is_transient());
        assert!(GenerationErrorKind::Timeout.is_transient());
        assert!(GenerationErrorKind::Connection.is_transient());
        assert!(!GenerationErrorKind::InvalidRequest.is_transient());
        assert!(!GenerationErrorKind::Authentication.is_transient());
    }

    #[tokio::test]
    async fn test_stream_from_events() {
        let mut stream = GenerationStream::from_events(vec![
            StreamEvent::Started,
            StreamEvent::TextDelta("hello".to_string()),
            StreamEvent::Done {
                usage: TokenUsage::default(),
                stop_reason: StopReason::EndTurn,
            },
        ]);

        assert!(matches!(stream.recv().await, Some(StreamEvent::Started)));
        assert!(matches!(stream.recv().await, Some(StreamEvent::TextDelta(t)) if t == "hello"));
        assert!(matches!(stream.recv().await, Some(StreamEvent::Done { .. })));
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_str("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::from_str("max_tokens"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_str("weird"), StopReason::Unknown);
    }
}
