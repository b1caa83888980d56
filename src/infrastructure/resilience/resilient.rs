//! Resilient Generator - 熔断 + 重试包装的生成调用
//!
//! 把"一次完整的流式生成"（建流 + 消费到 Done）包在熔断器和重试策略里。
//! 事件流不可重放，重试总是从头发起新调用。
//! 消费循环带软超时（长时间无新事件视为连接停滞），
//! 阶段级硬超时由 worker 在外层施加。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use crate::application::ports::{
    GenerationError, GenerationRequest, GenerationServicePort, GenerationStream, StopReason,
    StreamEvent, TokenUsage,
};

use super::circuit_breaker::{CircuitBreaker, CircuitOpenError};
use super::retry::{FailureClass, RetryPolicy};

/// 一次完整调用的汇总结果
#[derive(Debug, Clone)]
pub struct CollectedGeneration {
    pub text: String,
    pub reasoning: String,
    pub usage: TokenUsage,
    pub stop_reason: StopReason,
    /// 本次调用消耗的重试次数
    pub retries: u32,
}

/// 弹性调用错误
#[derive(Debug, Error)]
pub enum GenerateError {
    /// 熔断中，调用方应延迟重排任务而不是失败
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// 永久性错误，不重试
    #[error("permanent generation failure: {0}")]
    Permanent(GenerationError),

    /// 重试预算耗尽
    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: GenerationError,
    },
}

impl GenerateError {
    /// 失败类别字符串（任务失败记录用）
    pub fn kind_str(&self) -> &'static str {
        match self {
            GenerateError::CircuitOpen(_) => "circuit_open",
            GenerateError::Permanent(e) => e.kind().as_str(),
            GenerateError::RetriesExhausted { last_error, .. } => last_error.kind().as_str(),
        }
    }
}

/// 重试时的回调（attempt 序号、即将等待的时长、触发错误）
pub type RetryHook<'a> = &'a (dyn Fn(u32, Duration, &GenerationError) + Send + Sync);

/// 弹性生成器
pub struct ResilientGenerator {
    service: Arc<dyn GenerationServicePort>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    /// 软超时：两个事件之间允许的最长间隔
    no_progress_timeout: Duration,
}

impl ResilientGenerator {
    pub fn new(
        service: Arc<dyn GenerationServicePort>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        no_progress_timeout: Duration,
    ) -> Self {
        Self {
            service,
            breaker,
            retry,
            no_progress_timeout,
        }
    }

    /// 执行一次带重试的完整生成
    ///
    /// `on_retry` 在每次退避等待前调用，供上层推送"重试中"进度。
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        on_retry: Option<RetryHook<'_>>,
    ) -> Result<CollectedGeneration, GenerateError> {
        let mut attempt = 0u32;

        loop {
            // 熔断检查在重试循环内：熔断打开时快速失败，不消耗重试预算
            self.breaker.try_acquire()?;

            match self.attempt_once(request).await {
                Ok(mut collected) => {
                    self.breaker.record_success();
                    collected.retries = attempt;
                    return Ok(collected);
                }
                Err(error) => {
                    let class = RetryPolicy::classify(&error);

                    if class == FailureClass::Permanent {
                        // 调用方错误不计入依赖健康度
                        return Err(GenerateError::Permanent(error));
                    }

                    self.breaker.record_failure();

                    if !self.retry.has_budget(attempt) {
                        return Err(GenerateError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: error,
                        });
                    }

                    let delay = self.retry.delay_for(attempt, class);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        kind = error.kind().as_str(),
                        error = %error,
                        "Generation call failed, retrying"
                    );
                    if let Some(hook) = on_retry {
                        hook(attempt + 1, delay, &error);
                    }

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// 单次调用：建流并消费到 Done
    async fn attempt_once(
        &self,
        request: &GenerationRequest,
    ) -> Result<CollectedGeneration, GenerationError> {
        let stream = self.service.open_stream(request.clone()).await?;
        self.collect(stream).await
    }

    async fn collect(
        &self,
        mut stream: GenerationStream,
    ) -> Result<CollectedGeneration, GenerationError> {
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut running_usage = TokenUsage::default();

        loop {
            let event = match timeout(self.no_progress_timeout, stream.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(GenerationError::StreamClosed),
                Err(_) => {
                    return Err(GenerationError::Stalled(
                        self.no_progress_timeout.as_secs(),
                    ))
                }
            };

            match event {
                StreamEvent::Started
                | StreamEvent::ReasoningStarted
                | StreamEvent::ReasoningStopped
                | StreamEvent::TextStarted
                | StreamEvent::TextStopped => {}
                StreamEvent::ReasoningDelta(delta) => reasoning.push_str(&delta),
                StreamEvent::TextDelta(delta) => text.push_str(&delta),
                StreamEvent::UsageUpdate(usage) => running_usage = usage,
                StreamEvent::Error { kind, message } => {
                    return Err(GenerationError::Service { kind, message });
                }
                StreamEvent::Done { usage, stop_reason } => {
                    // Done 携带的最终用量优先于运行中快照
                    let final_usage = if usage == TokenUsage::default() {
                        running_usage
                    } else {
                        usage
                    };
                    return Ok(CollectedGeneration {
                        text,
                        reasoning,
                        usage: final_usage,
                        stop_reason,
                        retries: 0,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::GenerationErrorKind;
    use crate::infrastructure::adapters::FakeGenerationClient;
    use crate::infrastructure::resilience::circuit_breaker::{
        BreakerState, CircuitBreakerConfig,
    };

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            rate_limit_min_delay: Duration::from_millis(2),
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "generation-service",
            CircuitBreakerConfig {
                failure_threshold: 5,
                cooldown: Duration::from_secs(60),
                cooldown_max_factor: 4,
            },
        ))
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![crate::application::ports::Message::user("write")],
            max_output_tokens: 1024,
            reasoning_token_budget: 0,
        }
    }

    #[tokio::test]
    async fn test_collects_text_and_usage() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_text("Hello, world.", 10, 20);

        let generator =
            ResilientGenerator::new(fake.clone(), breaker(), fast_retry(), Duration::from_secs(5));

        let collected = generator.generate(&request(), None).await.unwrap();
        assert_eq!(collected.text, "Hello, world.");
        assert_eq!(collected.usage.prompt_tokens, 10);
        assert_eq!(collected.usage.completion_tokens, 20);
        assert_eq!(collected.retries, 0);
        assert_eq!(collected.stop_reason, StopReason::EndTurn);
    }

    #[tokio::test]
    async fn test_overloaded_twice_then_success() {
        // 场景 B：过载两次，第三次成功；重试计数 2，熔断器保持 closed
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_open_failure(GenerationErrorKind::Overloaded, "server busy");
        fake.push_open_failure(GenerationErrorKind::Overloaded, "server busy");
        fake.push_text("done at last", 5, 9);

        let breaker = breaker();
        let generator = ResilientGenerator::new(
            fake.clone(),
            breaker.clone(),
            fast_retry(),
            Duration::from_secs(5),
        );

        let collected = generator.generate(&request(), None).await.unwrap();
        assert_eq!(collected.retries, 2);
        assert_eq!(collected.text, "done at last");
        assert_eq!(fake.call_count(), 3);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_open_failure(GenerationErrorKind::Authentication, "bad key");

        let breaker = breaker();
        let generator = ResilientGenerator::new(
            fake.clone(),
            breaker.clone(),
            fast_retry(),
            Duration::from_secs(5),
        );

        let err = generator.generate(&request(), None).await.unwrap_err();
        assert!(matches!(err, GenerateError::Permanent(_)));
        assert_eq!(fake.call_count(), 1);
        // 调用方错误不计入依赖失败
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let fake = Arc::new(FakeGenerationClient::new());
        for _ in 0..3 {
            fake.push_open_failure(GenerationErrorKind::Connection, "refused");
        }

        let generator =
            ResilientGenerator::new(fake.clone(), breaker(), fast_retry(), Duration::from_secs(5));

        let err = generator.generate(&request(), None).await.unwrap_err();
        assert!(matches!(
            err,
            GenerateError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(fake.call_count(), 3);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        // 场景 C：连续 5 次过载打开熔断器，后续调用不触网
        let fake = Arc::new(FakeGenerationClient::new());
        for _ in 0..5 {
            fake.push_open_failure(GenerationErrorKind::Overloaded, "server busy");
        }

        let breaker = breaker();
        let retry = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            rate_limit_min_delay: Duration::from_millis(1),
        };
        let generator = ResilientGenerator::new(
            fake.clone(),
            breaker.clone(),
            retry,
            Duration::from_secs(5),
        );

        // 5 次失败后第 6 次尝试撞上熔断
        let err = generator.generate(&request(), None).await.unwrap_err();
        assert!(matches!(err, GenerateError::CircuitOpen(_)));
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(fake.call_count(), 5);

        // 冷却期内的新任务快速失败，无网络调用
        let err = generator.generate(&request(), None).await.unwrap_err();
        assert!(matches!(err, GenerateError::CircuitOpen(_)));
        assert_eq!(err.kind_str(), "circuit_open");
        assert_eq!(fake.call_count(), 5);
    }

    #[tokio::test]
    async fn test_mid_stream_error_retried() {
        // 流中途的 Error 事件同样按分类重试
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_events(vec![
            StreamEvent::Started,
            StreamEvent::TextDelta("partial".to_string()),
            StreamEvent::Error {
                kind: GenerationErrorKind::Overloaded,
                message: "dropped".to_string(),
            },
        ]);
        fake.push_text("complete text", 3, 4);

        let generator =
            ResilientGenerator::new(fake.clone(), breaker(), fast_retry(), Duration::from_secs(5));

        let collected = generator.generate(&request(), None).await.unwrap();
        // 部分内容被丢弃，重试从头开始
        assert_eq!(collected.text, "complete text");
        assert_eq!(collected.retries, 1);
    }

    #[tokio::test]
    async fn test_stream_closed_before_done_is_transient() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_events(vec![
            StreamEvent::Started,
            StreamEvent::TextDelta("half a".to_string()),
            // 没有 Done，通道直接关闭
        ]);
        fake.push_text("whole answer", 2, 2);

        let generator =
            ResilientGenerator::new(fake.clone(), breaker(), fast_retry(), Duration::from_secs(5));

        let collected = generator.generate(&request(), None).await.unwrap();
        assert_eq!(collected.text, "whole answer");
        assert_eq!(collected.retries, 1);
    }

    #[tokio::test]
    async fn test_retry_hook_invoked() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_open_failure(GenerationErrorKind::Overloaded, "busy");
        fake.push_text("ok", 1, 1);

        let generator =
            ResilientGenerator::new(fake.clone(), breaker(), fast_retry(), Duration::from_secs(5));

        let hook_calls = std::sync::Mutex::new(Vec::new());
        let hook = |attempt: u32, _delay: Duration, error: &GenerationError| {
            hook_calls.lock().unwrap().push((attempt, error.kind()));
        };

        generator.generate(&request(), Some(&hook)).await.unwrap();

        let calls = hook_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 1);
        assert_eq!(calls[0].1, GenerationErrorKind::Overloaded);
    }
}
