//! HTTP Generation Client - 调用外部流式生成服务
//!
//! 实现 GenerationServicePort trait，通过 SSE 消费外部服务的流式响应，
//! 把供应商事件归一化为 StreamEvent 序列。
//!
//! 外部生成 API:
//! POST {base_url}/v1/generate
//! Request: {"model": "...", "messages": [...], "max_output_tokens": N,
//!           "reasoning_token_budget": N, "stream": true}  (JSON)
//! Response: text/event-stream，data 行为 JSON 事件

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::application::ports::{
    GenerationError, GenerationErrorKind, GenerationRequest, GenerationServicePort,
    GenerationStream, StopReason, StreamEvent, TokenUsage,
};

/// 生成请求体 (JSON)
#[derive(Debug, Serialize)]
struct GenerationHttpRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_token_budget: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// 供应商 SSE 事件（未知类型落入 Unknown，不会 panic）
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: WireMessageInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Option<WireDeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireMessageInfo {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text,
    Reasoning,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    ReasoningDelta { reasoning: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireDeltaUsage {
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// HTTP 生成客户端配置
#[derive(Debug, Clone)]
pub struct HttpGenerationClientConfig {
    /// 生成服务基础 URL
    pub base_url: String,
    /// API 密钥（可选，经 Authorization 头传递）
    pub api_key: Option<String>,
    /// 模型标识
    pub model: String,
    /// 连接超时（秒）；读超时由弹性层的软超时控制
    pub connect_timeout_secs: u64,
}

impl Default for HttpGenerationClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8700".to_string(),
            api_key: None,
            model: "default".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

/// HTTP 生成客户端
pub struct HttpGenerationClient {
    client: Client,
    config: HttpGenerationClientConfig,
}

impl HttpGenerationClient {
    /// 创建客户端（不设整体超时：流式响应可持续数十分钟）
    pub fn new(config: HttpGenerationClientConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                GenerationError::service(GenerationErrorKind::Connection, e.to_string())
            })?;

        Ok(Self { client, config })
    }

    fn generate_url(&self) -> String {
        format!("{}/v1/generate", self.config.base_url)
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.config.base_url)
    }

    fn map_reqwest_error(e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::service(GenerationErrorKind::Timeout, e.to_string())
        } else if e.is_connect() {
            GenerationError::service(
                GenerationErrorKind::Connection,
                format!("Cannot connect to generation service: {}", e),
            )
        } else {
            GenerationError::service(GenerationErrorKind::Connection, e.to_string())
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> GenerationError {
        let kind = match status.as_u16() {
            429 => GenerationErrorKind::RateLimited,
            529 | 503 => GenerationErrorKind::Overloaded,
            401 | 403 => GenerationErrorKind::Authentication,
            400 | 422 => GenerationErrorKind::InvalidRequest,
            408 => GenerationErrorKind::Timeout,
            _ => GenerationErrorKind::Connection,
        };
        GenerationError::service(kind, format!("HTTP {}: {}", status, body))
    }

    /// 供应商声明的错误类别原样映射
    fn map_error_type(error_type: &str) -> GenerationErrorKind {
        match error_type {
            "overloaded" | "overloaded_error" => GenerationErrorKind::Overloaded,
            "rate_limited" | "rate_limit_error" => GenerationErrorKind::RateLimited,
            "timeout" | "timeout_error" => GenerationErrorKind::Timeout,
            "invalid_request" | "invalid_request_error" => GenerationErrorKind::InvalidRequest,
            "authentication" | "authentication_error" => GenerationErrorKind::Authentication,
            _ => GenerationErrorKind::Connection,
        }
    }
}

/// SSE 行解析状态机
///
/// 跟踪每个 content block 的类型，把 delta 路由到文本或推理轨迹。
struct SseEventMapper {
    block_kinds: HashMap<usize, BlockKind>,
    prompt_tokens: u64,
    completion_tokens: u64,
    reasoning_tokens: u64,
    stop_reason: StopReason,
    done_emitted: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Reasoning,
}

impl SseEventMapper {
    fn new() -> Self {
        Self {
            block_kinds: HashMap::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            reasoning_tokens: 0,
            stop_reason: StopReason::Unknown,
            done_emitted: false,
        }
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            reasoning_tokens: self.reasoning_tokens,
        }
    }

    /// 单条 SSE data 行 → 0..n 个归一化事件
    fn map_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let trimmed = line.trim();

        // SSE 流包含 event:/id:/retry:/注释行，只处理 data 行
        let json_str = match trimmed.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            None => return vec![],
        };
        if json_str.is_empty() || json_str == "[DONE]" {
            return vec![];
        }

        let event: WireEvent = match serde_json::from_str(json_str) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable SSE line");
                return vec![];
            }
        };

        match event {
            WireEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.prompt_tokens = usage.prompt_tokens;
                    self.completion_tokens = usage.completion_tokens;
                    self.reasoning_tokens = usage.reasoning_tokens;
                    vec![StreamEvent::Started, StreamEvent::UsageUpdate(self.usage())]
                } else {
                    vec![StreamEvent::Started]
                }
            }
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                WireContentBlock::Text => {
                    self.block_kinds.insert(index, BlockKind::Text);
                    vec![StreamEvent::TextStarted]
                }
                WireContentBlock::Reasoning => {
                    self.block_kinds.insert(index, BlockKind::Reasoning);
                    vec![StreamEvent::ReasoningStarted]
                }
                WireContentBlock::Other => vec![],
            },
            // 以 delta 自身类型为准，block 类型仅用于 stop 事件的路由
            WireEvent::ContentBlockDelta { delta, .. } => match delta {
                WireDelta::TextDelta { text } => vec![StreamEvent::TextDelta(text)],
                WireDelta::ReasoningDelta { reasoning } => {
                    vec![StreamEvent::ReasoningDelta(reasoning)]
                }
                WireDelta::Other => vec![],
            },
            WireEvent::ContentBlockStop { index } => match self.block_kinds.remove(&index) {
                Some(BlockKind::Text) => vec![StreamEvent::TextStopped],
                Some(BlockKind::Reasoning) => vec![StreamEvent::ReasoningStopped],
                None => vec![],
            },
            WireEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = StopReason::from_str(&reason);
                }
                if let Some(usage) = usage {
                    self.completion_tokens = usage.completion_tokens;
                    self.reasoning_tokens = usage.reasoning_tokens;
                    vec![StreamEvent::UsageUpdate(self.usage())]
                } else {
                    vec![]
                }
            }
            WireEvent::MessageStop => {
                self.done_emitted = true;
                vec![StreamEvent::Done {
                    usage: self.usage(),
                    stop_reason: self.stop_reason,
                }]
            }
            // keep-alive 不产生事件
            WireEvent::Ping => vec![],
            WireEvent::Error { error } => {
                vec![StreamEvent::Error {
                    kind: HttpGenerationClient::map_error_type(&error.error_type),
                    message: error.message,
                }]
            }
            WireEvent::Unknown => {
                tracing::debug!("Ignoring unknown provider event type");
                vec![]
            }
        }
    }
}

#[async_trait]
impl GenerationServicePort for HttpGenerationClient {
    async fn open_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationStream, GenerationError> {
        let http_request = GenerationHttpRequest {
            model: self.config.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            max_output_tokens: request.max_output_tokens,
            reasoning_token_budget: (request.reasoning_token_budget > 0)
                .then_some(request.reasoning_token_budget),
            stream: true,
        };

        tracing::debug!(
            url = %self.generate_url(),
            messages = http_request.messages.len(),
            max_output_tokens = http_request.max_output_tokens,
            "Opening generation stream"
        );

        let mut builder = self
            .client
            .post(self.generate_url())
            .header("Accept", "text/event-stream")
            .json(&http_request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(Self::map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(256);
        let mut byte_stream = response.bytes_stream();

        // 读取任务：SSE 字节流 → 归一化事件
        // 消费端 drop 接收器时 send 失败，任务随之退出
        tokio::spawn(async move {
            let mut mapper = SseEventMapper::new();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error {
                                kind: GenerationErrorKind::Connection,
                                message: format!("stream read error: {}", e),
                            })
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].to_string();
                    buffer.drain(..=pos);

                    for event in mapper.map_line(&line) {
                        let terminal = matches!(
                            event,
                            StreamEvent::Done { .. } | StreamEvent::Error { .. }
                        );
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        if terminal {
                            return;
                        }
                    }
                }
            }

            // 流在 MessageStop 之前结束：通道关闭，消费端得到 StreamClosed
            if !mapper.done_emitted {
                tracing::warn!("SSE stream ended without message_stop");
            }
        });

        Ok(GenerationStream::new(rx))
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.health_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_all(mapper: &mut SseEventMapper, lines: &[&str]) -> Vec<StreamEvent> {
        lines
            .iter()
            .flat_map(|line| mapper.map_line(line))
            .collect()
    }

    #[test]
    fn test_full_stream_mapping() {
        let mut mapper = SseEventMapper::new();
        let events = map_all(
            &mut mapper,
            &[
                r#"data: {"type":"message_start","message":{"usage":{"prompt_tokens":120}}}"#,
                r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"reasoning"}}"#,
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"reasoning_delta","reasoning":"thinking..."}}"#,
                r#"data: {"type":"content_block_stop","index":0}"#,
                r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"text"}}"#,
                r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Chapter 1"}}"#,
                r#"data: {"type":"content_block_stop","index":1}"#,
                r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"completion_tokens":900,"reasoning_tokens":80}}"#,
                r#"data: {"type":"message_stop"}"#,
            ],
        );

        assert!(matches!(events[0], StreamEvent::Started));
        assert!(matches!(events[1], StreamEvent::UsageUpdate(u) if u.prompt_tokens == 120));
        assert!(matches!(events[2], StreamEvent::ReasoningStarted));
        assert!(
            matches!(&events[3], StreamEvent::ReasoningDelta(t) if t == "thinking...")
        );
        assert!(matches!(events[4], StreamEvent::ReasoningStopped));
        assert!(matches!(events[5], StreamEvent::TextStarted));
        assert!(matches!(&events[6], StreamEvent::TextDelta(t) if t == "Chapter 1"));
        assert!(matches!(events[7], StreamEvent::TextStopped));

        match events.last().unwrap() {
            StreamEvent::Done { usage, stop_reason } => {
                assert_eq!(usage.prompt_tokens, 120);
                assert_eq!(usage.completion_tokens, 900);
                assert_eq!(usage.reasoning_tokens, 80);
                assert_eq!(*stop_reason, StopReason::EndTurn);
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_and_comments_produce_no_events() {
        let mut mapper = SseEventMapper::new();
        let events = map_all(
            &mut mapper,
            &[
                r#"data: {"type":"ping"}"#,
                ": keep-alive comment",
                "event: message_start",
                "",
                "id: 42",
            ],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_provider_error_kinds_surface_verbatim() {
        let cases = [
            ("overloaded", GenerationErrorKind::Overloaded),
            ("overloaded_error", GenerationErrorKind::Overloaded),
            ("rate_limited", GenerationErrorKind::RateLimited),
            ("invalid_request", GenerationErrorKind::InvalidRequest),
            ("authentication", GenerationErrorKind::Authentication),
        ];

        for (wire_type, expected) in cases {
            let mut mapper = SseEventMapper::new();
            let line = format!(
                r#"data: {{"type":"error","error":{{"type":"{}","message":"boom"}}}}"#,
                wire_type
            );
            let events = mapper.map_line(&line);
            assert_eq!(events.len(), 1);
            match &events[0] {
                StreamEvent::Error { kind, message } => {
                    assert_eq!(*kind, expected);
                    assert_eq!(message, "boom");
                }
                other => panic!("expected Error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_event_ignored() {
        let mut mapper = SseEventMapper::new();
        let events = mapper.map_line(r#"data: {"type":"future_fancy_event","payload":1}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            HttpGenerationClient::map_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "").kind(),
            GenerationErrorKind::RateLimited
        );
        assert_eq!(
            HttpGenerationClient::map_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "").kind(),
            GenerationErrorKind::Overloaded
        );
        assert_eq!(
            HttpGenerationClient::map_status(reqwest::StatusCode::UNAUTHORIZED, "").kind(),
            GenerationErrorKind::Authentication
        );
        assert_eq!(
            HttpGenerationClient::map_status(reqwest::StatusCode::BAD_REQUEST, "").kind(),
            GenerationErrorKind::InvalidRequest
        );
    }
}
