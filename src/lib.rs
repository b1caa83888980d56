//! Bookforge - 长文本生成编排引擎
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Book Context: 生成任务聚合、大纲实体、分块结果
//! - chunking: 大纲 → 分块计划的确定性分配
//! - page_measure: 页数/词数测量策略
//!
//! 应用层 (application/):
//! - Ports: 端口定义（GenerationService, JobStore, JobQueue, ProgressSink,
//!   DocumentAssembler, RateLimiter）
//! - Commands: CQRS 命令处理器（提交/确认/重生成/取消）
//! - Queries: CQRS 查询处理器
//!
//! 基础设施层 (infrastructure/):
//! - HTTP: RESTful API + WebSocket 进度推送
//! - Resilience: 熔断器 + 指数退避重试
//! - Adapters: SSE 生成客户端、文档装配器
//! - Worker: 调度池、大纲规划、分块校验
//! - Memory: 优先级队列、滚动窗口限流
//! - Persistence: SQLite 任务存储
//! - Events: 进度事件发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
