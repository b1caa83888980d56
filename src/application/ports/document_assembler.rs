//! Document Assembler Port - 成品文档装配
//!
//! 手稿完成后移交给外部装配器产出各格式工件。
//! 本子系统不依赖装配结果，装配失败不影响任务完成。

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 章节在手稿中的边界
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChapterBoundary {
    pub index: u32,
    pub title: String,
    /// 章节起始位置（字符偏移）
    pub char_offset: usize,
}

/// 待装配的手稿包
#[derive(Debug, Clone)]
pub struct ManuscriptPackage {
    pub job_id: Uuid,
    pub title: String,
    pub author: String,
    pub manuscript_text: String,
    pub chapter_boundaries: Vec<ChapterBoundary>,
    pub measured_pages: f64,
    pub measured_words: u64,
}

/// 单格式工件位置
#[derive(Debug, Clone)]
pub struct ArtifactLocation {
    /// 格式标识（如 "markdown", "pdf", "epub"）
    pub format: String,
    pub location: String,
}

/// 装配结果
#[derive(Debug, Clone)]
pub struct AssembledArtifacts {
    pub artifacts: Vec<ArtifactLocation>,
}

/// 装配错误
#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Assembler rejected manuscript: {0}")]
    Rejected(String),
}

/// Document Assembler Port
#[async_trait]
pub trait DocumentAssemblerPort: Send + Sync {
    /// 装配手稿，返回各格式工件位置
    async fn assemble(
        &self,
        package: ManuscriptPackage,
    ) -> Result<AssembledArtifacts, AssemblerError>;
}
