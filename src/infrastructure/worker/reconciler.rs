//! Coherence Reconciler - 分块校验与修复
//!
//! 每个分块流完后：测页数 → 算合规率 → 对照已接受分块查重章节标题 →
//! 低于下界且无重复时发起有机扩写，直到落入容差带或扩写次数耗尽。
//! 已接受的分块从不丢弃、从不重排；未达标的缺口记录为非致命标记。

use std::collections::HashSet;
use std::sync::Arc;

use crate::application::ports::GenerationRequest;
use crate::domain::book::{BookParams, UsageMetrics};
use crate::domain::{ChunkDescriptor, PageMeasure};
use crate::infrastructure::resilience::{
    CollectedGeneration, GenerateError, ResilientGenerator, RetryHook,
};

use super::architect::ArchitectConfig;
use super::prompts;

/// 校验配置
#[derive(Debug, Clone, Copy)]
pub struct CoherenceConfig {
    /// 合规率下界（低于此值触发扩写）
    pub lower_bound: f64,
    /// 合规率上界（仅用于记录，超出不截断）
    pub upper_bound: f64,
    /// 每块最多扩写次数
    pub max_expansion_attempts: u32,
    /// 扩写调用的输出 token 预算
    pub expansion_max_output_tokens: u32,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            lower_bound: 0.90,
            upper_bound: 1.10,
            max_expansion_attempts: 2,
            expansion_max_output_tokens: 16_384,
        }
    }
}

/// 校验后的分块产出
#[derive(Debug)]
pub struct ReconciledChunk {
    pub content: String,
    pub reasoning: Option<String>,
    pub measured_pages: f64,
    pub measured_words: u64,
    /// 与已接受分块重复的章节标题（标记，不丢弃）
    pub duplicate_headers: Vec<String>,
    pub expansion_attempts: u32,
    pub compliance_ratio: f64,
    /// 扩写耗尽后仍未补足的页数
    pub shortfall_pages: Option<f64>,
    /// 本分块（含扩写）的累计用量
    pub usage: UsageMetrics,
    /// 本分块（含扩写）消耗的重试次数
    pub retries: u32,
}

/// 提取章节标题行（生成契约要求每章以 markdown 标题开头）
pub fn extract_headers(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let stripped = trimmed.trim_start_matches('#');
            if stripped.len() == trimmed.len() {
                return None;
            }
            let header = stripped.trim();
            (!header.is_empty()).then(|| header.to_string())
        })
        .collect()
}

/// 标题归一化：小写、去标点、压缩空白
///
/// "Chapter 3: The Abyss" 与 "chapter 3 — the abyss" 视为同一结构。
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 校验器
pub struct Reconciler {
    generator: Arc<ResilientGenerator>,
    measure: PageMeasure,
    config: CoherenceConfig,
    pricing: ArchitectConfig,
}

impl Reconciler {
    pub fn new(
        generator: Arc<ResilientGenerator>,
        measure: PageMeasure,
        config: CoherenceConfig,
        pricing: ArchitectConfig,
    ) -> Self {
        Self {
            generator,
            measure,
            config,
            pricing,
        }
    }

    pub fn measure(&self) -> PageMeasure {
        self.measure
    }

    pub fn config(&self) -> CoherenceConfig {
        self.config
    }

    /// 校验一个刚流完的分块草稿，必要时有机扩写
    ///
    /// `accepted_headers` 是此前所有已接受分块的归一化标题集合。
    pub async fn reconcile(
        &self,
        params: &BookParams,
        chunk: &ChunkDescriptor,
        draft: CollectedGeneration,
        accepted_headers: &HashSet<String>,
        on_retry: Option<RetryHook<'_>>,
    ) -> Result<ReconciledChunk, GenerateError> {
        let mut content = draft.text;
        let reasoning = (!draft.reasoning.is_empty()).then_some(draft.reasoning);
        let mut usage = self.pricing.cost_of(&draft.usage);
        let mut retries = draft.retries;

        // 重复检测只看章节结构；跨块的人物/案例引用是合法的
        let duplicate_headers: Vec<String> = extract_headers(&content)
            .into_iter()
            .filter(|header| accepted_headers.contains(&normalize_header(header)))
            .collect();

        if !duplicate_headers.is_empty() {
            tracing::warn!(
                chunk_index = chunk.index,
                duplicates = ?duplicate_headers,
                "Chunk repeats chapter structure from earlier chunks"
            );
        }

        let mut ratio = self.measure.compliance_ratio(&content, chunk.target_pages);
        let mut attempts = 0u32;

        // 扩写循环：只在低于下界且无结构重复时触发
        while ratio < self.config.lower_bound
            && duplicate_headers.is_empty()
            && attempts < self.config.max_expansion_attempts
        {
            let shortfall = self.measure.shortfall(&content, chunk.target_pages);
            tracing::info!(
                chunk_index = chunk.index,
                compliance = format!("{:.3}", ratio),
                shortfall_pages = format!("{:.1}", shortfall),
                attempt = attempts + 1,
                "Chunk under target, requesting organic expansion"
            );

            let request = GenerationRequest {
                messages: prompts::expansion_prompt(params, chunk, &content, shortfall),
                max_output_tokens: self.config.expansion_max_output_tokens,
                reasoning_token_budget: 0,
            };

            let expansion = self.generator.generate(&request, on_retry).await?;
            usage.add(&self.pricing.cost_of(&expansion.usage));
            retries += expansion.retries;
            attempts += 1;

            if expansion.text.trim().is_empty() {
                tracing::warn!(chunk_index = chunk.index, "Expansion returned no text");
                continue;
            }

            content.push_str("\n\n");
            content.push_str(expansion.text.trim_start());
            ratio = self.measure.compliance_ratio(&content, chunk.target_pages);
        }

        let shortfall_pages = (ratio < self.config.lower_bound)
            .then(|| self.measure.shortfall(&content, chunk.target_pages));

        if let Some(shortfall) = shortfall_pages {
            tracing::warn!(
                chunk_index = chunk.index,
                compliance = format!("{:.3}", ratio),
                shortfall_pages = format!("{:.1}", shortfall),
                "Chunk accepted below target after exhausting expansions"
            );
        }
        if ratio > self.config.upper_bound {
            tracing::debug!(
                chunk_index = chunk.index,
                compliance = format!("{:.3}", ratio),
                "Chunk over target band, accepting as-is"
            );
        }

        Ok(ReconciledChunk {
            measured_pages: self.measure.pages(&content),
            measured_words: self.measure.words(&content),
            duplicate_headers,
            expansion_attempts: attempts,
            compliance_ratio: ratio,
            shortfall_pages,
            usage,
            retries,
            reasoning,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{StopReason, TokenUsage};
    use crate::infrastructure::adapters::FakeGenerationClient;
    use crate::infrastructure::resilience::{
        CircuitBreaker, CircuitBreakerConfig, RetryPolicy,
    };
    use std::time::Duration;

    fn reconciler(fake: Arc<FakeGenerationClient>, chars_per_page: usize) -> Reconciler {
        let generator = Arc::new(ResilientGenerator::new(
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
        ));
        Reconciler::new(
            generator,
            PageMeasure::new(chars_per_page),
            CoherenceConfig::default(),
            ArchitectConfig::default(),
        )
    }

    fn params() -> BookParams {
        BookParams {
            title: "Deep Oceans".to_string(),
            genre: "science".to_string(),
            audience: "general".to_string(),
            tone: "accessible".to_string(),
            topics: vec![],
            target_pages: 80,
            target_chapters: 12,
            language: "en".to_string(),
            format_hints: vec![],
        }
    }

    fn chunk(target_pages: u32) -> ChunkDescriptor {
        ChunkDescriptor {
            index: 0,
            chapter_start: 0,
            chapter_end: 4,
            target_pages,
        }
    }

    fn draft(text: &str) -> CollectedGeneration {
        CollectedGeneration {
            text: text.to_string(),
            reasoning: String::new(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 1000,
                reasoning_tokens: 0,
            },
            stop_reason: StopReason::EndTurn,
            retries: 0,
        }
    }

    #[test]
    fn test_header_extraction() {
        let text = "# Chapter 1: Surface Waters\nprose here\n## Subsection\n\
                    not # a header\n# Chapter 2: The Abyss\n";
        let headers = extract_headers(text);
        assert_eq!(
            headers,
            vec![
                "Chapter 1: Surface Waters",
                "Subsection",
                "Chapter 2: The Abyss"
            ]
        );
    }

    #[test]
    fn test_header_normalization_matches_variants() {
        assert_eq!(
            normalize_header("Chapter 3: The Abyss"),
            normalize_header("chapter 3 — The  ABYSS!")
        );
        assert_ne!(
            normalize_header("Chapter 3: The Abyss"),
            normalize_header("Chapter 4: The Abyss")
        );
    }

    #[tokio::test]
    async fn test_compliant_chunk_accepted_without_expansion() {
        let fake = Arc::new(FakeGenerationClient::new());
        let reconciler = reconciler(fake.clone(), 100);

        // 10 页目标，950 字符 = 9.5 页 → 合规率 0.95
        let text = format!("# Chapter 1: Alpha\n{}", "x".repeat(930));
        let result = reconciler
            .reconcile(&params(), &chunk(10), draft(&text), &HashSet::new(), None)
            .await
            .unwrap();

        assert_eq!(result.expansion_attempts, 0);
        assert!(result.compliance_ratio >= 0.90 && result.compliance_ratio <= 1.10);
        assert!(result.shortfall_pages.is_none());
        assert!(result.duplicate_headers.is_empty());
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_undersized_chunk_expanded_into_band() {
        let fake = Arc::new(FakeGenerationClient::new());
        // 扩写返回 400 字符，把 600 字符补到 1000+
        fake.set_fallback_text(&"y".repeat(400));
        let reconciler = reconciler(fake.clone(), 100);

        let result = reconciler
            .reconcile(
                &params(),
                &chunk(10),
                draft(&"x".repeat(600)),
                &HashSet::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.expansion_attempts, 1);
        assert!(result.compliance_ratio >= 0.90);
        assert!(result.shortfall_pages.is_none());
        assert_eq!(fake.call_count(), 1);
        // 扩写是追加，不是重写
        assert!(result.content.starts_with(&"x".repeat(600)));
    }

    #[tokio::test]
    async fn test_expansion_exhaustion_records_shortfall() {
        let fake = Arc::new(FakeGenerationClient::new());
        // 每次扩写只给 10 个字符，两次后仍不达标
        fake.set_fallback_text(&"z".repeat(10));
        let reconciler = reconciler(fake.clone(), 100);

        let result = reconciler
            .reconcile(
                &params(),
                &chunk(10),
                draft(&"x".repeat(300)),
                &HashSet::new(),
                None,
            )
            .await
            .unwrap();

        // 缺口记录为非致命标记，分块仍被接受
        assert_eq!(result.expansion_attempts, 2);
        assert!(result.shortfall_pages.unwrap() > 0.0);
        assert!(result.compliance_ratio < 0.90);
    }

    #[tokio::test]
    async fn test_duplicate_structure_flagged_and_blocks_expansion() {
        let fake = Arc::new(FakeGenerationClient::new());
        let reconciler = reconciler(fake.clone(), 100);

        let mut accepted = HashSet::new();
        accepted.insert(normalize_header("Chapter 1: Alpha"));

        let text = format!("# Chapter 1: Alpha\n{}", "x".repeat(100));
        let result = reconciler
            .reconcile(&params(), &chunk(10), draft(&text), &accepted, None)
            .await
            .unwrap();

        assert_eq!(result.duplicate_headers, vec!["Chapter 1: Alpha"]);
        // 结构重复时不做扩写（扩写会放大重复内容）
        assert_eq!(result.expansion_attempts, 0);
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cross_chunk_character_references_permitted() {
        let fake = Arc::new(FakeGenerationClient::new());
        let reconciler = reconciler(fake.clone(), 10);

        let mut accepted = HashSet::new();
        accepted.insert(normalize_header("Chapter 1: Alpha"));

        // 正文里提到前文人物不算重复，只有标题行参与比对
        let text = "# Chapter 2: Beta\nDr. Chen returns to the Chapter 1: Alpha findings.\n";
        let result = reconciler
            .reconcile(&params(), &chunk(2), draft(text), &accepted, None)
            .await
            .unwrap();

        assert!(result.duplicate_headers.is_empty());
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_expansions() {
        let fake = Arc::new(FakeGenerationClient::new());
        fake.set_fallback_text(&"y".repeat(50));
        let reconciler = reconciler(fake.clone(), 100);

        let result = reconciler
            .reconcile(
                &params(),
                &chunk(10),
                draft(&"x".repeat(300)),
                &HashSet::new(),
                None,
            )
            .await
            .unwrap();

        // 草稿 1000 completion + 两次扩写的用量
        assert!(result.usage.completion_tokens > 1000);
    }
}
