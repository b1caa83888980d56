//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod document_assembler;
mod generation_service;
mod job_queue;
mod job_store;
mod progress_sink;

pub use document_assembler::{
    ArtifactLocation, AssembledArtifacts, AssemblerError, ChapterBoundary, DocumentAssemblerPort,
    ManuscriptPackage,
};
pub use generation_service::{
    GenerationError, GenerationErrorKind, GenerationRequest, GenerationServicePort,
    GenerationStream, Message, Role, StopReason, StreamEvent, TokenUsage,
};
pub use job_queue::{
    AdmissionKind, ArchitectureFeedback, JobPriority, JobQueuePort, QueuedWork, RateLimitExceeded,
    RateLimiterPort,
};
pub use job_store::{JobStoreError, JobStorePort};
pub use progress_sink::{ProgressEvent, ProgressSinkPort};
