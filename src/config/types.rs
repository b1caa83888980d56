//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;

/// 应用主配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 生成服务配置
    #[serde(default)]
    pub generation: GenerationConfig,

    /// 弹性层配置（熔断 + 重试）
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// 分块配置
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// 合规校验配置
    #[serde(default)]
    pub coherence: CoherenceConfig,

    /// 调度器配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 装配器配置
    #[serde(default)]
    pub assembler: AssemblerConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5070
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 生成服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// 生成服务基础 URL
    #[serde(default = "default_generation_url")]
    pub url: String,

    /// API 密钥（可选）
    #[serde(default)]
    pub api_key: Option<String>,

    /// 模型标识
    #[serde(default = "default_model")]
    pub model: String,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// 软超时：流上两个事件之间的最长间隔（秒）
    #[serde(default = "default_no_progress_timeout")]
    pub no_progress_timeout_secs: u64,

    /// 大纲阶段硬超时（秒）
    #[serde(default = "default_architecture_timeout")]
    pub architecture_timeout_secs: u64,

    /// 单个分块硬超时（秒）
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,

    /// 大纲调用的输出 token 预算
    #[serde(default = "default_architecture_max_tokens")]
    pub architecture_max_output_tokens: u32,

    /// 大纲调用的推理 token 预算
    #[serde(default = "default_reasoning_budget")]
    pub reasoning_token_budget: u32,

    /// 分块调用的输出 token 预算
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_output_tokens: u32,

    /// 成本估算：每百万 prompt token 价格（美元）
    #[serde(default = "default_prompt_cost")]
    pub prompt_cost_per_mtok: f64,

    /// 成本估算：每百万 completion token 价格（美元）
    #[serde(default = "default_completion_cost")]
    pub completion_cost_per_mtok: f64,
}

fn default_generation_url() -> String {
    "http://localhost:8700".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_no_progress_timeout() -> u64 {
    1200
}

fn default_architecture_timeout() -> u64 {
    2400
}

fn default_chunk_timeout() -> u64 {
    3600
}

fn default_architecture_max_tokens() -> u32 {
    8_192
}

fn default_reasoning_budget() -> u32 {
    4_096
}

fn default_chunk_max_tokens() -> u32 {
    32_768
}

fn default_prompt_cost() -> f64 {
    3.0
}

fn default_completion_cost() -> f64 {
    15.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            api_key: None,
            model: default_model(),
            connect_timeout_secs: default_connect_timeout(),
            no_progress_timeout_secs: default_no_progress_timeout(),
            architecture_timeout_secs: default_architecture_timeout(),
            chunk_timeout_secs: default_chunk_timeout(),
            architecture_max_output_tokens: default_architecture_max_tokens(),
            reasoning_token_budget: default_reasoning_budget(),
            chunk_max_output_tokens: default_chunk_max_tokens(),
            prompt_cost_per_mtok: default_prompt_cost(),
            completion_cost_per_mtok: default_completion_cost(),
        }
    }
}

/// 弹性层配置
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// 连续失败多少次后熔断
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// 熔断冷却时长（秒）
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// 冷却时长最大放大倍数
    #[serde(default = "default_cooldown_factor")]
    pub cooldown_max_factor: u32,

    /// 最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 退避基础延迟（毫秒）
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// 退避延迟上限（毫秒）
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// 限流错误的最小延迟（毫秒）
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_min_delay_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown() -> u64 {
    300
}

fn default_cooldown_factor() -> u32 {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_rate_limit_delay() -> u64 {
    10_000
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            cooldown_max_factor: default_cooldown_factor(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            rate_limit_min_delay_ms: default_rate_limit_delay(),
        }
    }
}

/// 分块配置
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// 每块最多覆盖的章节数
    #[serde(default = "default_max_chapters")]
    pub max_chapters_per_chunk: usize,

    /// 每块最大目标页数
    #[serde(default = "default_max_pages")]
    pub max_pages_per_chunk: u32,
}

fn default_max_chapters() -> usize {
    5
}

fn default_max_pages() -> u32 {
    30
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chapters_per_chunk: default_max_chapters(),
            max_pages_per_chunk: default_max_pages(),
        }
    }
}

/// 合规校验配置
#[derive(Debug, Clone, Deserialize)]
pub struct CoherenceConfig {
    /// 每页字符数（规划与校验共用同一换算）
    #[serde(default = "default_chars_per_page")]
    pub chars_per_page: usize,

    /// 合规率下界
    #[serde(default = "default_lower_bound")]
    pub lower_bound: f64,

    /// 合规率上界
    #[serde(default = "default_upper_bound")]
    pub upper_bound: f64,

    /// 每块最多扩写次数
    #[serde(default = "default_max_expansions")]
    pub max_expansion_attempts: u32,

    /// 扩写调用的输出 token 预算
    #[serde(default = "default_expansion_max_tokens")]
    pub expansion_max_output_tokens: u32,
}

fn default_chars_per_page() -> usize {
    1800
}

fn default_lower_bound() -> f64 {
    0.90
}

fn default_upper_bound() -> f64 {
    1.10
}

fn default_max_expansions() -> u32 {
    2
}

fn default_expansion_max_tokens() -> u32 {
    16_384
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            chars_per_page: default_chars_per_page(),
            lower_bound: default_lower_bound(),
            upper_bound: default_upper_bound(),
            max_expansion_attempts: default_max_expansions(),
            expansion_max_output_tokens: default_expansion_max_tokens(),
        }
    }
}

/// 调度器配置
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// 并发 worker 槽位数
    #[serde(default = "default_slots")]
    pub worker_slots: usize,

    /// 延迟重排的最小时长（秒）
    #[serde(default = "default_defer_delay")]
    pub defer_delay_secs: u64,

    /// 限流窗口时长（秒）
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    /// 窗口内每用户的大纲请求限额
    #[serde(default = "default_architecture_limit")]
    pub architecture_per_window: u32,

    /// 窗口内每用户的全书生成限额
    #[serde(default = "default_generation_limit")]
    pub generations_per_window: u32,
}

fn default_slots() -> usize {
    2
}

fn default_defer_delay() -> u64 {
    60
}

fn default_rate_window() -> u64 {
    3600
}

fn default_architecture_limit() -> u32 {
    10
}

fn default_generation_limit() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_slots: default_slots(),
            defer_delay_secs: default_defer_delay(),
            rate_window_secs: default_rate_window(),
            architecture_per_window: default_architecture_limit(),
            generations_per_window: default_generation_limit(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    #[serde(default = "default_db_path")]
    pub path: String,

    /// 最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/bookforge.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path)
    }
}

/// 装配器配置
#[derive(Debug, Clone, Deserialize)]
pub struct AssemblerConfig {
    /// 工件输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// 手稿署名
    #[serde(default = "default_author")]
    pub author: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/manuscripts")
}

fn default_author() -> String {
    "bookforge".to_string()
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            author: default_author(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
