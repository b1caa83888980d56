//! Fake Generation Client - 用于测试的生成客户端
//!
//! 按预置脚本逐次返回事件流或调用失败，不访问网络。
//! 脚本耗尽后返回一段固定文本，保证测试不会挂起。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::ports::{
    GenerationError, GenerationErrorKind, GenerationRequest, GenerationServicePort,
    GenerationStream, StopReason, StreamEvent, TokenUsage,
};

/// 单次调用的脚本
enum ScriptedCall {
    /// open_stream 直接失败（如 HTTP 非 2xx、连接拒绝）
    FailOpen {
        kind: GenerationErrorKind,
        message: String,
    },
    /// 返回预置事件序列
    Events(Vec<StreamEvent>),
}

/// Fake Generation Client
pub struct FakeGenerationClient {
    scripts: Mutex<VecDeque<ScriptedCall>>,
    /// 收到的请求（供断言 prompt 内容）
    requests: Mutex<Vec<GenerationRequest>>,
    /// 脚本耗尽后的兜底文本
    fallback_text: Mutex<String>,
}

impl FakeGenerationClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            fallback_text: Mutex::new("fallback generated text.".to_string()),
        }
    }

    /// 预置一次成功调用，返回给定文本
    pub fn push_text(&self, text: &str, prompt_tokens: u64, completion_tokens: u64) {
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            reasoning_tokens: 0,
        };
        self.push_events(vec![
            StreamEvent::Started,
            StreamEvent::TextStarted,
            StreamEvent::TextDelta(text.to_string()),
            StreamEvent::TextStopped,
            StreamEvent::UsageUpdate(usage),
            StreamEvent::Done {
                usage,
                stop_reason: StopReason::EndTurn,
            },
        ]);
    }

    /// 预置一次 open_stream 失败
    pub fn push_open_failure(&self, kind: GenerationErrorKind, message: &str) {
        self.scripts.lock().unwrap().push_back(ScriptedCall::FailOpen {
            kind,
            message: message.to_string(),
        });
    }

    /// 预置一次自定义事件序列
    pub fn push_events(&self, events: Vec<StreamEvent>) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(ScriptedCall::Events(events));
    }

    /// 设置脚本耗尽后的兜底文本
    pub fn set_fallback_text(&self, text: &str) {
        *self.fallback_text.lock().unwrap() = text.to_string();
    }

    /// 已发生的调用次数
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// 收到的所有请求
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn fallback_events(&self) -> Vec<StreamEvent> {
        let text = self.fallback_text.lock().unwrap().clone();
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: text.split_whitespace().count() as u64,
            reasoning_tokens: 0,
        };
        vec![
            StreamEvent::Started,
            StreamEvent::TextStarted,
            StreamEvent::TextDelta(text),
            StreamEvent::TextStopped,
            StreamEvent::Done {
                usage,
                stop_reason: StopReason::EndTurn,
            },
        ]
    }
}

impl Default for FakeGenerationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationServicePort for FakeGenerationClient {
    async fn open_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationStream, GenerationError> {
        self.requests.lock().unwrap().push(request);

        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(ScriptedCall::FailOpen { kind, message }) => {
                Err(GenerationError::Service { kind, message })
            }
            Some(ScriptedCall::Events(events)) => Ok(GenerationStream::from_events(events)),
            None => Ok(GenerationStream::from_events(self.fallback_events())),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}
