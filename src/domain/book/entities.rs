//! Book Context - Entities
//!
//! Architecture（书籍大纲）及其组成部分。大纲由规划阶段一次性创建，
//! 用户反馈触发重生成时整体替换，进入 generating 后不可变。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobId;

/// 章节大纲描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterOutline {
    /// 章节序号（从 0 开始）
    pub index: u32,
    pub title: String,
    /// 分配的目标页数
    pub target_pages: u32,
    pub summary: String,
    /// 本章引用的贯穿元素（人物/案例名称）
    #[serde(default)]
    pub recurring_refs: Vec<String>,
}

/// 贯穿全书的元素（人物或案例研究）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringElement {
    pub name: String,
    /// "character" 或 "case_study"
    pub kind: String,
    pub description: String,
}

/// 特殊区块（前言、附录、练习等）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialSection {
    pub title: String,
    /// 放置位置（"front" / "back" / "per_chapter"）
    pub placement: String,
    pub description: String,
}

/// 书籍大纲（Architecture）
///
/// 不变量:
/// - 属于且仅属于一个 GenerationJob
/// - 章节顺序不可变
/// - sum(chapter.target_pages) == target_page_total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Architecture {
    pub id: Uuid,
    pub job_id: JobId,
    pub chapters: Vec<ChapterOutline>,
    #[serde(default)]
    pub recurring_elements: Vec<RecurringElement>,
    #[serde(default)]
    pub special_sections: Vec<SpecialSection>,
    /// 章节页数分配之和
    pub target_page_total: u32,
    pub created_at: DateTime<Utc>,
}

impl Architecture {
    /// 由章节列表构建，target_page_total 为分配之和
    pub fn new(
        job_id: JobId,
        chapters: Vec<ChapterOutline>,
        recurring_elements: Vec<RecurringElement>,
        special_sections: Vec<SpecialSection>,
    ) -> Self {
        let target_page_total = chapters.iter().map(|c| c.target_pages).sum();
        Self {
            id: Uuid::new_v4(),
            job_id,
            chapters,
            recurring_elements,
            special_sections,
            target_page_total,
            created_at: Utc::now(),
        }
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// 页数分配与目标值的偏差（用于校验，允许每章 ±1 页的取整误差）
    pub fn allocation_deviation(&self, target_pages: u32) -> u32 {
        self.target_page_total.abs_diff(target_pages)
    }
}

/// 单个分块的生成结果
///
/// 按 ChunkPlan 顺序追加到任务的手稿中，禁止重排。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    /// 正文内容
    pub content: String,
    /// 推理轨迹（若服务提供）
    pub reasoning: Option<String>,
    /// 实测页数
    pub measured_pages: f64,
    /// 实测词数
    pub measured_words: u64,
    /// 与已接受分块重复的章节标题（仅标记，不丢弃）
    pub duplicate_headers: Vec<String>,
    /// 为达到页数目标执行的扩写次数
    pub expansion_attempts: u32,
    pub created_at: DateTime<Utc>,
}
