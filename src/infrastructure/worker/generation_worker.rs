//! Generation Worker - 后台任务调度与执行
//!
//! 固定大小的 worker 池从优先级队列消费工作单元，单个任务内各阶段
//! 严格串行（大纲 → 分块 → 校验，后一阶段的提示词依赖前一阶段产出）。
//!
//! 准入控制在出队后、执行前检查；超限或熔断时延迟重排而不是失败。
//! 取消只在阶段/分块边界检查（流中途的部分内容无法安全保留）。
//! 终态通过 Job Store 的幂等迁移恰好一次地对外上报。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::application::ports::{
    AdmissionKind, ArchitectureFeedback, ChapterBoundary, DocumentAssemblerPort, GenerationRequest,
    JobQueuePort, JobStorePort, ManuscriptPackage, ProgressEvent, ProgressSinkPort, QueuedWork,
    RateLimiterPort,
};
use crate::domain::book::{
    Architecture, ChunkResult, GenerationJob, JobFailure, JobId, JobStatus,
};
use crate::domain::{distribute, ChunkingConfig};
use crate::infrastructure::resilience::{GenerateError, ResilientGenerator};

use super::architect::{ArchitectError, ArchitectPlanner};
use super::prompts;
use super::reconciler::{extract_headers, normalize_header, Reconciler};

/// Worker 配置
#[derive(Debug, Clone)]
pub struct GenerationWorkerConfig {
    /// 并发 worker 槽位数
    pub slots: usize,
    /// 熔断/限流之外的通用延迟重排时长
    pub defer_delay: Duration,
    /// 大纲阶段硬超时（墙钟）
    pub architecture_timeout: Duration,
    /// 单个分块硬超时（含扩写）
    pub chunk_timeout: Duration,
    /// 分块正文调用的输出 token 预算
    pub chunk_max_output_tokens: u32,
    /// 分块正文调用的推理 token 预算
    pub chunk_reasoning_token_budget: u32,
    /// 装配包的署名
    pub author: String,
}

impl Default for GenerationWorkerConfig {
    fn default() -> Self {
        Self {
            slots: 2,
            defer_delay: Duration::from_secs(60),
            architecture_timeout: Duration::from_secs(2400),
            chunk_timeout: Duration::from_secs(3600),
            chunk_max_output_tokens: 32_768,
            chunk_reasoning_token_budget: 0,
            author: "bookforge".to_string(),
        }
    }
}

/// 生成 Worker
pub struct GenerationWorker {
    config: GenerationWorkerConfig,
    queue: Arc<dyn JobQueuePort>,
    rate_limiter: Arc<dyn RateLimiterPort>,
    job_store: Arc<dyn JobStorePort>,
    planner: Arc<ArchitectPlanner>,
    reconciler: Arc<Reconciler>,
    generator: Arc<ResilientGenerator>,
    assembler: Arc<dyn DocumentAssemblerPort>,
    progress: Arc<dyn ProgressSinkPort>,
    chunking: ChunkingConfig,
}

impl GenerationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GenerationWorkerConfig,
        queue: Arc<dyn JobQueuePort>,
        rate_limiter: Arc<dyn RateLimiterPort>,
        job_store: Arc<dyn JobStorePort>,
        planner: Arc<ArchitectPlanner>,
        reconciler: Arc<Reconciler>,
        generator: Arc<ResilientGenerator>,
        assembler: Arc<dyn DocumentAssemblerPort>,
        progress: Arc<dyn ProgressSinkPort>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            config,
            queue,
            rate_limiter,
            job_store,
            planner,
            reconciler,
            generator,
            assembler,
            progress,
            chunking,
        }
    }

    /// 启动 worker 池（队列关闭后退出）
    pub async fn run(self: Arc<Self>) {
        tracing::info!(slots = self.config.slots, "GenerationWorker started");

        let semaphore = Arc::new(Semaphore::new(self.config.slots));

        while let Some(work) = self.queue.pop().await {
            // 执行前准入检查：超限任务延迟重排，不失败
            if let Some(delay) = self.admission_delay(&work).await {
                let priority = work.priority();
                self.publish(
                    work.job_id(),
                    "queued",
                    0,
                    "Rate limit reached, generation deferred",
                );
                self.queue.push_delayed(work, priority, delay).await;
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let worker = self.clone();
            tokio::spawn(async move {
                let _permit = permit; // 持有 permit 直到任务完成
                worker.process_work(work).await;
            });
        }

        tracing::info!("GenerationWorker stopped");
    }

    /// 准入检查；需要延迟时返回时长
    async fn admission_delay(&self, work: &QueuedWork) -> Option<Duration> {
        let kind = match work {
            QueuedWork::Architecture { .. } | QueuedWork::Regeneration { .. } => {
                AdmissionKind::Architecture
            }
            QueuedWork::FullGeneration { .. } => AdmissionKind::FullGeneration,
            QueuedWork::Notification { .. } => return None,
        };

        let job = match self.job_store.get(work.job_id()).await {
            Ok(Some(job)) => job,
            _ => return None, // 任务缺失由 process_work 统一处理
        };

        match self.rate_limiter.try_acquire(job.user_id(), kind) {
            Ok(()) => None,
            Err(exceeded) => {
                tracing::info!(
                    job_id = %work.job_id(),
                    user_id = %job.user_id(),
                    kind = exceeded.kind,
                    retry_after_secs = exceeded.retry_after.as_secs(),
                    "Job deferred by per-user rate limit"
                );
                Some(exceeded.retry_after.max(self.config.defer_delay))
            }
        }
    }

    /// 处理单个工作单元
    pub async fn process_work(&self, work: QueuedWork) {
        match work {
            QueuedWork::Architecture { job_id } => {
                self.run_architecture_stage(job_id, None).await;
            }
            QueuedWork::Regeneration { job_id, feedback } => {
                self.run_architecture_stage(job_id, Some(feedback)).await;
            }
            QueuedWork::FullGeneration { job_id } => {
                self.run_generation_stage(job_id).await;
            }
            QueuedWork::Notification { job_id, message } => {
                if let Ok(Some(job)) = self.job_store.get(job_id).await {
                    let percent = if job.status().is_terminal() { 100 } else { 0 };
                    self.publish(job_id, job.status().as_str(), percent, &message);
                }
            }
        }
    }

    // ========================================================================
    // 大纲阶段
    // ========================================================================

    async fn run_architecture_stage(&self, job_id: Uuid, feedback: Option<ArchitectureFeedback>) {
        let job = match self.load_active_job(job_id).await {
            Some(job) => job,
            None => return,
        };
        let is_regeneration = feedback.is_some();

        if is_regeneration {
            self.publish(job_id, "architecture", 10, "Regenerating book architecture");
        } else {
            if !self
                .transition_or_fail(job_id, JobStatus::Architecture)
                .await
            {
                return;
            }
            self.publish(
                job_id,
                "architecture",
                5,
                JobStatus::Architecture.phase_message(),
            );
        }

        let prior = if is_regeneration {
            match self.job_store.latest_architecture(job_id).await {
                Ok(prior) => prior,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to load prior architecture");
                    None
                }
            }
        } else {
            None
        };

        let progress = self.progress.clone();
        let on_retry = move |attempt: u32,
                             _delay: Duration,
                             _error: &crate::application::ports::GenerationError| {
            progress.publish(ProgressEvent::new(
                job_id,
                "architecture",
                10,
                format!("Generation service busy, retrying (attempt {})", attempt),
            ));
        };

        let planned = tokio::time::timeout(
            self.config.architecture_timeout,
            self.planner.plan(
                JobId::from_uuid(job_id),
                job.params(),
                prior.as_ref(),
                feedback.as_ref(),
                Some(&on_retry),
            ),
        )
        .await;

        let planned = match planned {
            Err(_elapsed) => {
                self.fail_job(
                    job_id,
                    "timeout",
                    format!(
                        "architecture phase exceeded {} seconds",
                        self.config.architecture_timeout.as_secs()
                    ),
                    "architecture",
                )
                .await;
                return;
            }
            Ok(Err(ArchitectError::Generation(GenerateError::CircuitOpen(open)))) => {
                // 资源耗尽：任务延迟重排，状态不动
                self.publish(
                    job_id,
                    "architecture",
                    5,
                    "Generation service unavailable, job deferred",
                );
                let work = match feedback {
                    Some(feedback) => QueuedWork::Regeneration { job_id, feedback },
                    None => QueuedWork::Architecture { job_id },
                };
                let priority = work.priority();
                self.queue
                    .push_delayed(work, priority, open.retry_after.max(self.config.defer_delay))
                    .await;
                return;
            }
            Ok(Err(ArchitectError::Generation(error))) => {
                if let GenerateError::RetriesExhausted { attempts, .. } = &error {
                    let _ = self.job_store.add_retries(job_id, *attempts - 1).await;
                }
                self.fail_job(job_id, error.kind_str(), error.to_string(), "architecture")
                    .await;
                return;
            }
            Ok(Err(ArchitectError::Parse(error))) => {
                // 契约违规：该阶段致命；用户可通过重生成发起新尝试
                self.fail_job(
                    job_id,
                    "architecture_parse",
                    error.to_string(),
                    "architecture",
                )
                .await;
                return;
            }
            Ok(Ok(planned)) => planned,
        };

        if let Err(e) = self
            .job_store
            .save_architecture(job_id, &planned.architecture)
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist architecture");
            self.fail_job(job_id, "storage", e.to_string(), "architecture")
                .await;
            return;
        }
        let _ = self.job_store.append_usage(job_id, &planned.usage).await;
        let _ = self.job_store.add_retries(job_id, planned.retries).await;

        // 重生成时状态已是 awaiting_approval，幂等迁移不报错
        if !self
            .transition_or_fail(job_id, JobStatus::AwaitingApproval)
            .await
        {
            return;
        }
        self.publish(
            job_id,
            "awaiting_approval",
            20,
            JobStatus::AwaitingApproval.phase_message(),
        );
    }

    // ========================================================================
    // 全书生成阶段
    // ========================================================================

    async fn run_generation_stage(&self, job_id: Uuid) {
        let job = match self.load_active_job(job_id).await {
            Some(job) => job,
            None => return,
        };
        if job.status() != JobStatus::Generating {
            tracing::warn!(
                job_id = %job_id,
                status = job.status().as_str(),
                "Full generation dequeued in unexpected status, skipping"
            );
            return;
        }

        let architecture = match self.job_store.latest_architecture(job_id).await {
            Ok(Some(architecture)) => architecture,
            Ok(None) => {
                self.fail_job(
                    job_id,
                    "missing_architecture",
                    "job entered generating without an architecture".to_string(),
                    "generating",
                )
                .await;
                return;
            }
            Err(e) => {
                self.fail_job(job_id, "storage", e.to_string(), "generating")
                    .await;
                return;
            }
        };

        // 分块计划由大纲确定性导出；续跑时重算得到同一计划
        let plan = distribute(&architecture, &self.chunking);
        if plan.is_empty() {
            self.fail_job(
                job_id,
                "missing_architecture",
                "chunk plan is empty".to_string(),
                "generating",
            )
            .await;
            return;
        }

        // 已接受的分块（worker 崩溃后续跑）
        let mut accepted = match self.job_store.chunks_for_job(job_id).await {
            Ok(chunks) => chunks,
            Err(e) => {
                self.fail_job(job_id, "storage", e.to_string(), "generating")
                    .await;
                return;
            }
        };
        let mut accepted_headers: HashSet<String> = accepted
            .iter()
            .flat_map(|chunk| extract_headers(&chunk.content))
            .map(|header| normalize_header(&header))
            .collect();

        let total = plan.len();
        for chunk_desc in &plan.chunks {
            if chunk_desc.index < accepted.len() {
                continue; // 续跑：跳过已完成分块
            }

            // 取消检查只在分块边界
            if self.cancelled(job_id).await {
                tracing::info!(job_id = %job_id, "Job cancelled, abandoning generation");
                return;
            }

            let percent = 20 + (70 * chunk_desc.index / total) as u8;
            self.publish(
                job_id,
                "generating",
                percent,
                format!("Writing section {}/{}", chunk_desc.index + 1, total),
            );

            let previous_tail = accepted.last().map(|chunk| chunk.content.as_str());
            let request = GenerationRequest {
                messages: prompts::chunk_prompt(
                    job.params(),
                    &architecture,
                    chunk_desc,
                    previous_tail,
                ),
                max_output_tokens: self.config.chunk_max_output_tokens,
                reasoning_token_budget: self.config.chunk_reasoning_token_budget,
            };

            let progress = self.progress.clone();
            let on_retry = move |attempt: u32,
                                 _delay: Duration,
                                 _error: &crate::application::ports::GenerationError| {
                progress.publish(ProgressEvent::new(
                    job_id,
                    "generating",
                    percent,
                    format!("Generation service busy, retrying (attempt {})", attempt),
                ));
            };

            // 硬超时覆盖草稿 + 校验/扩写的完整分块处理
            let reconciled = tokio::time::timeout(self.config.chunk_timeout, async {
                let draft = self.generator.generate(&request, Some(&on_retry)).await?;
                self.reconciler
                    .reconcile(
                        job.params(),
                        chunk_desc,
                        draft,
                        &accepted_headers,
                        Some(&on_retry),
                    )
                    .await
            })
            .await;

            let reconciled = match reconciled {
                Err(_elapsed) => {
                    self.fail_job(
                        job_id,
                        "timeout",
                        format!(
                            "chunk {} exceeded {} seconds",
                            chunk_desc.index,
                            self.config.chunk_timeout.as_secs()
                        ),
                        "generating",
                    )
                    .await;
                    return;
                }
                Ok(Err(GenerateError::CircuitOpen(open))) => {
                    // 已保存的分块留在存储里，任务整体延迟重排后续跑
                    self.publish(
                        job_id,
                        "generating",
                        percent,
                        "Generation service unavailable, job deferred",
                    );
                    self.queue
                        .push_delayed(
                            QueuedWork::FullGeneration { job_id },
                            QueuedWork::FullGeneration { job_id }.priority(),
                            open.retry_after.max(self.config.defer_delay),
                        )
                        .await;
                    return;
                }
                Ok(Err(error)) => {
                    if let GenerateError::RetriesExhausted { attempts, .. } = &error {
                        let _ = self.job_store.add_retries(job_id, *attempts - 1).await;
                    }
                    self.fail_job(job_id, error.kind_str(), error.to_string(), "generating")
                        .await;
                    return;
                }
                Ok(Ok(reconciled)) => reconciled,
            };

            let chunk = ChunkResult {
                chunk_index: chunk_desc.index,
                content: reconciled.content,
                reasoning: reconciled.reasoning,
                measured_pages: reconciled.measured_pages,
                measured_words: reconciled.measured_words,
                duplicate_headers: reconciled.duplicate_headers,
                expansion_attempts: reconciled.expansion_attempts,
                created_at: Utc::now(),
            };

            if let Err(e) = self.job_store.save_chunk(job_id, &chunk).await {
                self.fail_job(job_id, "storage", e.to_string(), "generating")
                    .await;
                return;
            }
            let _ = self.job_store.append_usage(job_id, &reconciled.usage).await;
            let _ = self.job_store.add_retries(job_id, reconciled.retries).await;

            tracing::info!(
                job_id = %job_id,
                chunk_index = chunk_desc.index,
                pages = format!("{:.1}", chunk.measured_pages),
                compliance = format!("{:.3}", reconciled.compliance_ratio),
                expansions = chunk.expansion_attempts,
                duplicates = chunk.duplicate_headers.len(),
                "Chunk accepted"
            );

            for header in extract_headers(&chunk.content) {
                accepted_headers.insert(normalize_header(&header));
            }
            accepted.push(chunk);
        }

        self.finalize(job_id, &job, &architecture, accepted).await;
    }

    /// 汇总手稿、记录缺口、移交装配、标记完成
    async fn finalize(
        &self,
        job_id: Uuid,
        job: &GenerationJob,
        architecture: &Architecture,
        accepted: Vec<ChunkResult>,
    ) {
        if self.cancelled(job_id).await {
            return;
        }
        if !self.transition_or_fail(job_id, JobStatus::Reconciling).await {
            return;
        }
        self.publish(
            job_id,
            "reconciling",
            90,
            JobStatus::Reconciling.phase_message(),
        );

        // 手稿 = 分块按计划顺序拼接，从不重排
        let manuscript = accepted
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let measure = self.reconciler.measure();
        let measured_pages = measure.pages(&manuscript);
        let measured_words = measure.words(&manuscript);
        let target = architecture.target_page_total.max(1);
        let final_ratio = measured_pages / target as f64;

        if final_ratio < self.reconciler.config().lower_bound {
            let shortfall = target as f64 - measured_pages;
            tracing::warn!(
                job_id = %job_id,
                compliance = format!("{:.3}", final_ratio),
                shortfall_pages = format!("{:.1}", shortfall),
                "Manuscript completed below page target"
            );
            let _ = self.job_store.record_shortfall(job_id, shortfall).await;
        }

        let package = ManuscriptPackage {
            job_id,
            title: job.params().title.clone(),
            author: self.config.author.clone(),
            chapter_boundaries: chapter_boundaries(&manuscript),
            manuscript_text: manuscript,
            measured_pages,
            measured_words,
        };

        // 装配是外部协作者：失败记日志，不影响任务完成
        if let Err(e) = self.assembler.assemble(package).await {
            tracing::error!(job_id = %job_id, error = %e, "Document assembly failed");
        }

        match self.job_store.update_status(job_id, JobStatus::Completed).await {
            Ok(true) => {
                self.publish(job_id, "completed", 100, JobStatus::Completed.phase_message());
                tracing::info!(
                    job_id = %job_id,
                    pages = format!("{:.1}", measured_pages),
                    words = measured_words,
                    compliance = format!("{:.3}", final_ratio),
                    "Generation job completed"
                );

                // 附属通知走低优先级通道，不占用生成槽位的调度顺位
                let notice = QueuedWork::Notification {
                    job_id,
                    message: format!(
                        "Manuscript \"{}\" is ready ({:.0} pages)",
                        job.params().title,
                        measured_pages
                    ),
                };
                let priority = notice.priority();
                self.queue.push(notice, priority).await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job completed");
            }
        }
    }

    // ========================================================================
    // 辅助
    // ========================================================================

    /// 加载任务；缺失或已终态（含已取消）返回 None
    async fn load_active_job(&self, job_id: Uuid) -> Option<GenerationJob> {
        match self.job_store.get(job_id).await {
            Ok(Some(job)) if job.status().is_terminal() => {
                tracing::debug!(
                    job_id = %job_id,
                    status = job.status().as_str(),
                    "Job already terminal, skipping"
                );
                None
            }
            Ok(Some(job)) => Some(job),
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Job not found, skipping");
                None
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
                None
            }
        }
    }

    async fn cancelled(&self, job_id: Uuid) -> bool {
        matches!(
            self.job_store.get(job_id).await,
            Ok(Some(job)) if job.status() == JobStatus::Cancelled
        )
    }

    /// 幂等状态迁移；失败（非法迁移/存储故障）时记失败并返回 false
    async fn transition_or_fail(&self, job_id: Uuid, status: JobStatus) -> bool {
        match self.job_store.update_status(job_id, status).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    to = status.as_str(),
                    error = %e,
                    "Status transition failed"
                );
                false
            }
        }
    }

    async fn fail_job(
        &self,
        job_id: Uuid,
        kind: &str,
        message: String,
        phase: &str,
    ) {
        tracing::error!(job_id = %job_id, kind = kind, phase = phase, error = %message, "Job failed");
        let failure = JobFailure::new(kind, message, phase);
        match self.job_store.record_failure(job_id, &failure).await {
            Ok(true) => {
                self.publish(job_id, "failed", 100, JobStatus::Failed.phase_message());
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
            }
        }
    }

    fn publish(&self, job_id: Uuid, phase: &str, percent: u8, message: impl Into<String>) {
        self.progress
            .publish(ProgressEvent::new(job_id, phase, percent, message));
    }
}

/// 扫描手稿中的章节标题，计算装配用的章节边界
fn chapter_boundaries(manuscript: &str) -> Vec<ChapterBoundary> {
    let mut boundaries = Vec::new();
    let mut offset = 0usize;

    for line in manuscript.lines() {
        let trimmed = line.trim();
        let stripped = trimmed.trim_start_matches('#');
        if stripped.len() != trimmed.len() {
            let title = stripped.trim();
            if !title.is_empty() {
                boundaries.push(ChapterBoundary {
                    index: boundaries.len() as u32,
                    title: title.to_string(),
                    char_offset: offset,
                });
            }
        }
        offset += line.chars().count() + 1;
    }

    boundaries
}


#[cfg(test)]
impl GenerationWorker {
    /// 测试入口：用替换的限流器执行准入检查
    async fn admission_delay_for_test(
        &self,
        work: &QueuedWork,
        limiter: Arc<dyn RateLimiterPort>,
    ) -> Option<Duration> {
        let job = self.job_store.get(work.job_id()).await.ok().flatten()?;
        limiter
            .try_acquire(job.user_id(), AdmissionKind::Architecture)
            .err()
            .map(|e| e.retry_after)
    }
}
