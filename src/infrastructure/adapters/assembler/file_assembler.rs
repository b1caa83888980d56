//! File Document Assembler - 本地文件系统装配器
//!
//! 把完成的手稿连同元数据落盘为 Markdown 工件。
//! 真实部署中这里换成对外部装配服务的调用；本子系统不依赖其产出。

use std::path::PathBuf;

use async_trait::async_trait;

use crate::application::ports::{
    ArtifactLocation, AssembledArtifacts, AssemblerError, DocumentAssemblerPort, ManuscriptPackage,
};

/// 文件装配器配置
#[derive(Debug, Clone)]
pub struct FileAssemblerConfig {
    /// 工件输出目录
    pub output_dir: PathBuf,
}

impl Default for FileAssemblerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/manuscripts"),
        }
    }
}

/// 文件装配器
pub struct FileAssembler {
    config: FileAssemblerConfig,
}

impl FileAssembler {
    pub fn new(config: FileAssemblerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DocumentAssemblerPort for FileAssembler {
    async fn assemble(
        &self,
        package: ManuscriptPackage,
    ) -> Result<AssembledArtifacts, AssemblerError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| AssemblerError::IoError(e.to_string()))?;

        let path = self
            .config
            .output_dir
            .join(format!("{}.md", package.job_id));

        let mut document = String::with_capacity(package.manuscript_text.len() + 256);
        document.push_str(&format!("% {}\n% {}\n\n", package.title, package.author));
        document.push_str(&package.manuscript_text);

        tokio::fs::write(&path, document)
            .await
            .map_err(|e| AssemblerError::IoError(e.to_string()))?;

        tracing::info!(
            job_id = %package.job_id,
            path = %path.display(),
            chapters = package.chapter_boundaries.len(),
            pages = package.measured_pages,
            words = package.measured_words,
            "Manuscript assembled"
        );

        Ok(AssembledArtifacts {
            artifacts: vec![ArtifactLocation {
                format: "markdown".to_string(),
                location: path.display().to_string(),
            }],
        })
    }
}
