//! Architect Planner - 大纲规划阶段
//!
//! 一次流式调用产出结构化大纲：构造请求 → 经弹性层收集输出 →
//! 解析校验。解析失败是契约违规，按该阶段的致命错误上抛，不重试。

use std::sync::Arc;

use thiserror::Error;

use crate::application::ports::{ArchitectureFeedback, GenerationRequest};
use crate::domain::book::{Architecture, BookParams, JobId, UsageMetrics};
use crate::infrastructure::resilience::{GenerateError, ResilientGenerator, RetryHook};

use super::outline_parser::{parse_outline, OutlineParseError};
use super::prompts;

/// 大纲阶段错误
#[derive(Debug, Error)]
pub enum ArchitectError {
    /// 生成调用失败（熔断/重试耗尽/永久错误）
    #[error(transparent)]
    Generation(#[from] GenerateError),

    /// 模型输出不符合大纲契约
    #[error("architecture parse failure: {0}")]
    Parse(#[from] OutlineParseError),
}

/// 大纲阶段的产出
#[derive(Debug)]
pub struct PlannedArchitecture {
    pub architecture: Architecture,
    pub usage: UsageMetrics,
    pub retries: u32,
}

/// 大纲规划器配置
#[derive(Debug, Clone, Copy)]
pub struct ArchitectConfig {
    /// 大纲调用的输出 token 预算
    pub max_output_tokens: u32,
    /// 推理 token 预算
    pub reasoning_token_budget: u32,
    /// 成本估算：每百万 prompt token 的价格
    pub prompt_cost_per_mtok: f64,
    /// 成本估算：每百万 completion token 的价格
    pub completion_cost_per_mtok: f64,
}

impl Default for ArchitectConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 8_192,
            reasoning_token_budget: 4_096,
            prompt_cost_per_mtok: 3.0,
            completion_cost_per_mtok: 15.0,
        }
    }
}

impl ArchitectConfig {
    /// Token 用量折算成本（推理 token 按 completion 计费）
    pub fn cost_of(&self, usage: &crate::application::ports::TokenUsage) -> UsageMetrics {
        UsageMetrics {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            estimated_cost: usage.prompt_tokens as f64 * self.prompt_cost_per_mtok / 1e6
                + (usage.completion_tokens + usage.reasoning_tokens) as f64
                    * self.completion_cost_per_mtok
                    / 1e6,
        }
    }
}

/// 大纲规划器
pub struct ArchitectPlanner {
    generator: Arc<ResilientGenerator>,
    config: ArchitectConfig,
}

impl ArchitectPlanner {
    pub fn new(generator: Arc<ResilientGenerator>, config: ArchitectConfig) -> Self {
        Self { generator, config }
    }

    /// 生成（或重生成）大纲
    ///
    /// `prior` 与 `feedback` 同时给出时走重生成路径；
    /// 重生成不限次数，每次的用量由调用方累加到任务上。
    pub async fn plan(
        &self,
        job_id: JobId,
        params: &BookParams,
        prior: Option<&Architecture>,
        feedback: Option<&ArchitectureFeedback>,
        on_retry: Option<RetryHook<'_>>,
    ) -> Result<PlannedArchitecture, ArchitectError> {
        let messages = match (prior, feedback) {
            (Some(prior), Some(feedback)) => {
                prompts::regeneration_prompt(params, prior, feedback)
            }
            _ => prompts::architecture_prompt(params),
        };

        let request = GenerationRequest {
            messages,
            max_output_tokens: self.config.max_output_tokens,
            reasoning_token_budget: self.config.reasoning_token_budget,
        };

        let collected = self.generator.generate(&request, on_retry).await?;

        tracing::debug!(
            job_id = %job_id,
            chars = collected.text.len(),
            retries = collected.retries,
            "Architecture draft collected, parsing"
        );

        let architecture = parse_outline(job_id, params, &collected.text)?;

        tracing::info!(
            job_id = %job_id,
            chapters = architecture.chapter_count(),
            page_total = architecture.target_page_total,
            regeneration = prior.is_some(),
            "Architecture planned"
        );

        Ok(PlannedArchitecture {
            architecture,
            usage: self.config.cost_of(&collected.usage),
            retries: collected.retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{GenerationErrorKind, TokenUsage};
    use crate::infrastructure::adapters::FakeGenerationClient;
    use crate::infrastructure::resilience::{
        CircuitBreaker, CircuitBreakerConfig, RetryPolicy,
    };
    use std::time::Duration;

    fn generator(fake: Arc<FakeGenerationClient>) -> Arc<ResilientGenerator> {
        Arc::new(ResilientGenerator::new(
            fake,
            Arc::new(CircuitBreaker::new(
                "generation-service",
                CircuitBreakerConfig::default(),
            )),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                rate_limit_min_delay: Duration::from_millis(1),
            },
            Duration::from_secs(5),
        ))
    }

    fn params() -> BookParams {
        BookParams {
            title: "Deep Oceans".to_string(),
            genre: "science".to_string(),
            audience: "general".to_string(),
            tone: "accessible".to_string(),
            topics: vec![],
            target_pages: 20,
            target_chapters: 2,
            language: "en".to_string(),
            format_hints: vec![],
        }
    }

    const OUTLINE: &str = r#"{"chapters":[
        {"title":"Surface Waters","target_pages":10,"summary":"a"},
        {"title":"The Abyss","target_pages":10,"summary":"b"}
    ]}"#;

    #[tokio::test]
    async fn test_plan_parses_outline_and_costs_usage() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_text(OUTLINE, 1_000_000, 2_000_000);

        let planner = ArchitectPlanner::new(generator(fake), ArchitectConfig::default());
        let planned = planner
            .plan(JobId::new(), &params(), None, None, None)
            .await
            .unwrap();

        assert_eq!(planned.architecture.chapter_count(), 2);
        assert_eq!(planned.usage.prompt_tokens, 1_000_000);
        // 1M prompt * $3/M + 2M completion * $15/M
        assert!((planned.usage.estimated_cost - 33.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_retried() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_text("I refuse to produce JSON today.", 10, 10);
        fake.push_text(OUTLINE, 10, 10);

        let planner = ArchitectPlanner::new(generator(fake.clone()), ArchitectConfig::default());
        let err = planner
            .plan(JobId::new(), &params(), None, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ArchitectError::Parse(_)));
        // 第二个脚本未被消费：解析失败没有触发重试
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_parsed() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_open_failure(GenerationErrorKind::Overloaded, "busy");
        fake.push_text(OUTLINE, 10, 10);

        let planner = ArchitectPlanner::new(generator(fake), ArchitectConfig::default());
        let planned = planner
            .plan(JobId::new(), &params(), None, None, None)
            .await
            .unwrap();

        assert_eq!(planned.retries, 1);
    }

    #[tokio::test]
    async fn test_regeneration_path_sends_feedback() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.push_text(OUTLINE, 10, 10);
        fake.push_text(OUTLINE, 10, 10);

        let planner = ArchitectPlanner::new(generator(fake.clone()), ArchitectConfig::default());
        let job_id = JobId::new();

        let first = planner
            .plan(job_id, &params(), None, None, None)
            .await
            .unwrap();

        planner
            .plan(
                job_id,
                &params(),
                Some(&first.architecture),
                Some(&ArchitectureFeedback {
                    dislike: "too shallow".to_string(),
                    change: "more depth".to_string(),
                }),
                None,
            )
            .await
            .unwrap();

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        // 重生成请求携带上一版大纲与两段反馈
        assert_eq!(requests[1].messages.len(), 4);
        assert!(requests[1].messages[3].content.contains("too shallow"));
        assert!(requests[1].messages[3].content.contains("more depth"));
    }

    #[test]
    fn test_cost_of_counts_reasoning_as_completion() {
        let config = ArchitectConfig::default();
        let usage = config.cost_of(&TokenUsage {
            prompt_tokens: 0,
            completion_tokens: 1_000_000,
            reasoning_tokens: 1_000_000,
        });
        assert!((usage.estimated_cost - 30.0).abs() < 1e-9);
    }
}
