//! 分块分配器
//!
//! 把已确认的大纲切分成若干生成单元（chunk），每块覆盖连续的章节区间，
//! 大小受限于单次流式调用的输出 token 预算。
//!
//! 分配策略:
//! 1. 按章节顺序贪心聚合
//! 2. 达到每块最大章节数时封块
//! 3. 累计页数将超过每块最大页数时封块
//!
//! 同一大纲的重复计算必须得到完全相同的计划（任务可能在分块级别续跑）。

use serde::{Deserialize, Serialize};

use crate::domain::book::Architecture;

/// 分块配置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// 每块最多覆盖的章节数
    pub max_chapters_per_chunk: usize,
    /// 每块最大目标页数（按输出 token 预算折算）
    pub max_pages_per_chunk: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chapters_per_chunk: 5,
            max_pages_per_chunk: 30,
        }
    }
}

/// 单个分块描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// 分块序号（从 0 开始）
    pub index: usize,
    /// 起始章节序号（含）
    pub chapter_start: usize,
    /// 结束章节序号（不含）
    pub chapter_end: usize,
    /// 成员章节页数分配之和
    pub target_pages: u32,
}

impl ChunkDescriptor {
    pub fn chapter_count(&self) -> usize {
        self.chapter_end - self.chapter_start
    }
}

/// 分块计划
///
/// 不变量: sum(chunk.target_pages) == architecture.target_page_total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunks: Vec<ChunkDescriptor>,
    pub total_pages: u32,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// 从大纲计算分块计划（确定性、幂等）
pub fn distribute(architecture: &Architecture, config: &ChunkingConfig) -> ChunkPlan {
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut pages = 0u32;

    for (i, chapter) in architecture.chapters.iter().enumerate() {
        let in_chunk = i - start;
        let would_exceed_pages =
            in_chunk > 0 && pages + chapter.target_pages > config.max_pages_per_chunk;
        let chapters_full = in_chunk >= config.max_chapters_per_chunk;

        if would_exceed_pages || chapters_full {
            chunks.push(ChunkDescriptor {
                index: chunks.len(),
                chapter_start: start,
                chapter_end: i,
                target_pages: pages,
            });
            start = i;
            pages = 0;
        }
        pages += chapter.target_pages;
    }

    if start < architecture.chapters.len() {
        chunks.push(ChunkDescriptor {
            index: chunks.len(),
            chapter_start: start,
            chapter_end: architecture.chapters.len(),
            target_pages: pages,
        });
    }

    ChunkPlan {
        total_pages: chunks.iter().map(|c| c.target_pages).sum(),
        chunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::book::{ChapterOutline, JobId};

    fn arch_with_pages(pages: &[u32]) -> Architecture {
        let chapters = pages
            .iter()
            .enumerate()
            .map(|(i, p)| ChapterOutline {
                index: i as u32,
                title: format!("Chapter {}", i + 1),
                target_pages: *p,
                summary: String::new(),
                recurring_refs: vec![],
            })
            .collect();
        Architecture::new(JobId::new(), chapters, vec![], vec![])
    }

    #[test]
    fn test_eighty_pages_twelve_chapters_gives_three_chunks() {
        // 80 页 / 12 章，典型分配 7 或 6 页一章
        let arch = arch_with_pages(&[7, 7, 7, 7, 7, 7, 7, 7, 6, 6, 6, 6]);
        assert_eq!(arch.target_page_total, 80);

        let plan = distribute(&arch, &ChunkingConfig::default());

        assert_eq!(plan.len(), 3);
        for chunk in &plan.chunks {
            assert!(chunk.chapter_count() <= 5);
            assert!(chunk.target_pages <= 30);
        }
        assert_eq!(plan.total_pages, arch.target_page_total);
    }

    #[test]
    fn test_chapter_limit_closes_chunk() {
        // 页数很小，只有章节数限制会触发
        let arch = arch_with_pages(&[1; 12]);
        let plan = distribute(&arch, &ChunkingConfig::default());

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.chunks[0].chapter_count(), 5);
        assert_eq!(plan.chunks[1].chapter_count(), 5);
        assert_eq!(plan.chunks[2].chapter_count(), 2);
    }

    #[test]
    fn test_page_budget_closes_chunk() {
        let arch = arch_with_pages(&[20, 20, 20]);
        let plan = distribute(
            &arch,
            &ChunkingConfig {
                max_chapters_per_chunk: 5,
                max_pages_per_chunk: 30,
            },
        );

        // 每章 20 页，两章就超 30 页，逐章封块
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.total_pages, 60);
    }

    #[test]
    fn test_oversized_single_chapter_gets_own_chunk() {
        // 单章超过页数预算时独占一块，不会死循环
        let arch = arch_with_pages(&[50, 3]);
        let plan = distribute(&arch, &ChunkingConfig::default());

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.chunks[0].target_pages, 50);
        assert_eq!(plan.total_pages, 53);
    }

    #[test]
    fn test_deterministic_recomputation() {
        let arch = arch_with_pages(&[7, 7, 7, 7, 7, 7, 7, 7, 6, 6, 6, 6]);
        let config = ChunkingConfig::default();

        let first = distribute(&arch, &config);
        for _ in 0..10 {
            assert_eq!(distribute(&arch, &config), first);
        }
    }

    #[test]
    fn test_chunk_ranges_are_contiguous() {
        let arch = arch_with_pages(&[5, 9, 2, 14, 3, 8, 11, 6]);
        let plan = distribute(&arch, &ChunkingConfig::default());

        let mut expected_start = 0;
        for chunk in &plan.chunks {
            assert_eq!(chunk.chapter_start, expected_start);
            assert!(chunk.chapter_end > chunk.chapter_start);
            expected_start = chunk.chapter_end;
        }
        assert_eq!(expected_start, arch.chapters.len());
        assert_eq!(plan.total_pages, arch.target_page_total);
    }

    #[test]
    fn test_empty_architecture() {
        let arch = arch_with_pages(&[]);
        let plan = distribute(&arch, &ChunkingConfig::default());
        assert!(plan.is_empty());
        assert_eq!(plan.total_pages, 0);
    }
}
