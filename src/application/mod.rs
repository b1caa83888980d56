//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（GenerationService、JobStore、JobQueue、
//!   ProgressSink、DocumentAssembler、RateLimiter）
//! - commands: CQRS 命令及处理器
//! - queries: CQRS 查询及处理器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;

// Re-exports
pub use commands::{
    handlers::{
        ApproveArchitectureHandler, CancelJobHandler, RegenerateArchitectureHandler,
        SubmitBookHandler, SubmitBookResponse,
    },
    ApproveArchitectureCommand, CancelJobCommand, RegenerateArchitectureCommand, SubmitBookCommand,
};

pub use error::ApplicationError;

pub use ports::{
    // Document assembler
    ArtifactLocation,
    AssembledArtifacts,
    AssemblerError,
    ChapterBoundary,
    DocumentAssemblerPort,
    ManuscriptPackage,
    // Generation service
    GenerationError,
    GenerationErrorKind,
    GenerationRequest,
    GenerationServicePort,
    GenerationStream,
    Message,
    Role,
    StopReason,
    StreamEvent,
    TokenUsage,
    // Job queue / admission
    AdmissionKind,
    ArchitectureFeedback,
    JobPriority,
    JobQueuePort,
    QueuedWork,
    RateLimitExceeded,
    RateLimiterPort,
    // Job store
    JobStoreError,
    JobStorePort,
    // Progress sink
    ProgressEvent,
    ProgressSinkPort,
};

pub use queries::{
    handlers::{GetArchitectureHandler, GetJobHandler, JobView, ListJobsHandler},
    GetArchitecture, GetJob, ListJobs,
};
