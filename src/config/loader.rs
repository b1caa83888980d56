//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `BOOKFORGE_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `BOOKFORGE_SERVER__PORT=8080`
/// - `BOOKFORGE_GENERATION__URL=http://llm-gateway:8700`
/// - `BOOKFORGE_GENERATION__API_KEY=sk-...`
/// - `BOOKFORGE_DATABASE__PATH=/data/bookforge.db`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 2. 环境变量（最高优先级）
    // 前缀: BOOKFORGE_，层级分隔符: __ (双下划线)
    builder = builder.add_source(
        Environment::with_prefix("BOOKFORGE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // 3. 反序列化（缺失字段落到 serde 默认值）
    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::ParseError(format!("Failed to deserialize config: {}", e)))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    if config.generation.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Generation service URL cannot be empty".to_string(),
        ));
    }

    if config.database.path.is_empty() {
        return Err(ConfigError::ValidationError(
            "Database path cannot be empty".to_string(),
        ));
    }

    if config.chunking.max_chapters_per_chunk == 0 {
        return Err(ConfigError::ValidationError(
            "max_chapters_per_chunk cannot be 0".to_string(),
        ));
    }

    if config.coherence.chars_per_page == 0 {
        return Err(ConfigError::ValidationError(
            "chars_per_page cannot be 0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.coherence.lower_bound)
        || config.coherence.upper_bound < config.coherence.lower_bound
    {
        return Err(ConfigError::ValidationError(
            "coherence bounds must satisfy 0 <= lower <= upper".to_string(),
        ));
    }

    if config.scheduler.worker_slots == 0 {
        return Err(ConfigError::ValidationError(
            "worker_slots cannot be 0".to_string(),
        ));
    }

    if config.resilience.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "max_attempts cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("Generation URL: {}", config.generation.url);
    tracing::info!("Generation model: {}", config.generation.model);
    tracing::info!(
        "Timeouts: soft {}s, architecture {}s, chunk {}s",
        config.generation.no_progress_timeout_secs,
        config.generation.architecture_timeout_secs,
        config.generation.chunk_timeout_secs
    );
    tracing::info!(
        "Resilience: threshold {}, cooldown {}s, attempts {}",
        config.resilience.failure_threshold,
        config.resilience.cooldown_secs,
        config.resilience.max_attempts
    );
    tracing::info!(
        "Chunking: <= {} chapters, <= {} pages per chunk",
        config.chunking.max_chapters_per_chunk,
        config.chunking.max_pages_per_chunk
    );
    tracing::info!(
        "Coherence: {} chars/page, band [{:.2}, {:.2}], {} expansions",
        config.coherence.chars_per_page,
        config.coherence.lower_bound,
        config.coherence.upper_bound,
        config.coherence.max_expansion_attempts
    );
    tracing::info!(
        "Scheduler: {} slots, {}/{} per {}s window",
        config.scheduler.worker_slots,
        config.scheduler.architecture_per_window,
        config.scheduler.generations_per_window,
        config.scheduler.rate_window_secs
    );
    tracing::info!("Database: {}", config.database.path);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5070);
        assert_eq!(config.coherence.chars_per_page, 1800);
        assert_eq!(config.chunking.max_chapters_per_chunk, 5);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_empty_generation_url() {
        let mut config = AppConfig::default();
        config.generation.url = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_inverted_bounds() {
        let mut config = AppConfig::default();
        config.coherence.lower_bound = 1.2;
        config.coherence.upper_bound = 0.9;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_chars_per_page() {
        let mut config = AppConfig::default();
        config.coherence.chars_per_page = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 6001

[coherence]
chars_per_page = 2000

[scheduler]
worker_slots = 4
"#,
        )
        .unwrap();

        let config = load_config_from_path(Some(&path)).unwrap();
        assert_eq!(config.server.port, 6001);
        assert_eq!(config.coherence.chars_per_page, 2000);
        assert_eq!(config.scheduler.worker_slots, 4);
        // 未覆盖的字段保持默认
        assert_eq!(config.chunking.max_chapters_per_chunk, 5);
    }
}
