//! Worker - 后台生成引擎
//!
//! - generation_worker: 调度池，按阶段驱动任务（大纲 → 分块 → 校验）
//! - architect: 大纲规划（流式调用 + 解析）
//! - outline_parser: 模型输出 → Architecture 的不可信输入解析器
//! - reconciler: 分块合规校验与有机扩写
//! - prompts: 各阶段提示词构造

mod architect;
mod generation_worker;
mod outline_parser;
mod prompts;
mod reconciler;

pub use architect::{ArchitectConfig, ArchitectError, ArchitectPlanner, PlannedArchitecture};
pub use generation_worker::{GenerationWorker, GenerationWorkerConfig};
pub use outline_parser::{parse_outline, OutlineParseError};
pub use reconciler::{CoherenceConfig, ReconciledChunk, Reconciler};
