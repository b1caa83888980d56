//! Bookforge - 长文本生成编排引擎
//!
//! 组装顺序:
//! - Domain: 无状态策略（分块、页数测量）
//! - Application: 命令/查询处理器
//! - Infrastructure: SQLite 存储、SSE 生成客户端、熔断弹性层、
//!   调度 worker 池、WebSocket 进度推送

use std::sync::Arc;
use std::time::Duration;

use bookforge::application::ports::GenerationServicePort;
use bookforge::config::{load_config, print_config};
use bookforge::domain::{ChunkingConfig, PageMeasure};
use bookforge::infrastructure::adapters::{
    FileAssembler, FileAssemblerConfig, HttpGenerationClient, HttpGenerationClientConfig,
};
use bookforge::infrastructure::events::ProgressPublisher;
use bookforge::infrastructure::http::{AppState, HttpServer, ServerConfig};
use bookforge::infrastructure::memory::{InMemoryJobQueue, InMemoryRateLimiter, RateLimiterConfig};
use bookforge::infrastructure::persistence::sqlite::{
    create_pool, run_migrations, DatabaseConfig, SqliteJobStore,
};
use bookforge::infrastructure::resilience::{
    CircuitBreaker, CircuitBreakerConfig, ResilientGenerator, RetryPolicy,
};
use bookforge::infrastructure::worker::{
    ArchitectConfig, ArchitectPlanner, CoherenceConfig, GenerationWorker, GenerationWorkerConfig,
    Reconciler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // 初始化日志
    let log_filter = format!(
        "{},bookforge={},tower_http=debug",
        config.log.level, config.log.level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
        )
        .init();

    tracing::info!("Bookforge - 长文本生成编排引擎");
    print_config(&config);

    // 确保数据目录存在
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::create_dir_all(&config.assembler.output_dir).await?;

    // 初始化数据库
    let db_config = DatabaseConfig {
        database_url: config.database.database_url(),
        max_connections: config.database.max_connections,
    };
    let pool = create_pool(&db_config).await?;
    run_migrations(&pool).await?;
    let job_store = Arc::new(SqliteJobStore::new(pool));

    // 创建生成服务客户端
    let generation_client = HttpGenerationClient::new(HttpGenerationClientConfig {
        base_url: config.generation.url.clone(),
        api_key: config.generation.api_key.clone(),
        model: config.generation.model.clone(),
        connect_timeout_secs: config.generation.connect_timeout_secs,
    })
    .map_err(|e| anyhow::anyhow!("Failed to build generation client: {}", e))?;
    let generation_client: Arc<dyn GenerationServicePort> = Arc::new(generation_client);

    // 弹性层：每个外部依赖一个熔断器实例，显式注入
    let breaker = Arc::new(CircuitBreaker::new(
        "generation-service",
        CircuitBreakerConfig {
            failure_threshold: config.resilience.failure_threshold,
            cooldown: Duration::from_secs(config.resilience.cooldown_secs),
            cooldown_max_factor: config.resilience.cooldown_max_factor,
        },
    ));
    let generator = Arc::new(ResilientGenerator::new(
        generation_client,
        breaker,
        RetryPolicy {
            max_attempts: config.resilience.max_attempts,
            base_delay: Duration::from_millis(config.resilience.base_delay_ms),
            max_delay: Duration::from_millis(config.resilience.max_delay_ms),
            rate_limit_min_delay: Duration::from_millis(config.resilience.rate_limit_min_delay_ms),
        },
        Duration::from_secs(config.generation.no_progress_timeout_secs),
    ));

    // 规划/校验策略（规划与校验共用同一页数换算）
    let measure = PageMeasure::new(config.coherence.chars_per_page);
    let pricing = ArchitectConfig {
        max_output_tokens: config.generation.architecture_max_output_tokens,
        reasoning_token_budget: config.generation.reasoning_token_budget,
        prompt_cost_per_mtok: config.generation.prompt_cost_per_mtok,
        completion_cost_per_mtok: config.generation.completion_cost_per_mtok,
    };
    let planner = Arc::new(ArchitectPlanner::new(generator.clone(), pricing));
    let reconciler = Arc::new(Reconciler::new(
        generator.clone(),
        measure,
        CoherenceConfig {
            lower_bound: config.coherence.lower_bound,
            upper_bound: config.coherence.upper_bound,
            max_expansion_attempts: config.coherence.max_expansion_attempts,
            expansion_max_output_tokens: config.coherence.expansion_max_output_tokens,
        },
        pricing,
    ));

    // 队列、限流、进度发布
    let job_queue = Arc::new(InMemoryJobQueue::new());
    let rate_limiter = Arc::new(InMemoryRateLimiter::new(RateLimiterConfig {
        window: Duration::from_secs(config.scheduler.rate_window_secs),
        architecture_limit: config.scheduler.architecture_per_window,
        generation_limit: config.scheduler.generations_per_window,
    }));
    let progress_publisher = Arc::new(ProgressPublisher::new());

    // 文档装配器
    let assembler = Arc::new(FileAssembler::new(FileAssemblerConfig {
        output_dir: config.assembler.output_dir.clone(),
    }));

    // 创建 GenerationWorker
    let worker = Arc::new(GenerationWorker::new(
        GenerationWorkerConfig {
            slots: config.scheduler.worker_slots,
            defer_delay: Duration::from_secs(config.scheduler.defer_delay_secs),
            architecture_timeout: Duration::from_secs(
                config.generation.architecture_timeout_secs,
            ),
            chunk_timeout: Duration::from_secs(config.generation.chunk_timeout_secs),
            chunk_max_output_tokens: config.generation.chunk_max_output_tokens,
            chunk_reasoning_token_budget: 0,
            author: config.assembler.author.clone(),
        },
        job_queue.clone(),
        rate_limiter,
        job_store.clone(),
        planner,
        reconciler,
        generator,
        assembler,
        progress_publisher.clone(),
        ChunkingConfig {
            max_chapters_per_chunk: config.chunking.max_chapters_per_chunk,
            max_pages_per_chunk: config.chunking.max_pages_per_chunk,
        },
    ));

    // 启动 Worker 池
    tokio::spawn(worker.run());

    // 创建 HTTP 服务器
    let server_config = ServerConfig::new(&config.server.host, config.server.port);
    let state = AppState::new(job_store, job_queue.clone(), progress_publisher);
    let server = HttpServer::new(server_config, state);

    tracing::info!("Starting HTTP server...");

    // 启动服务器（带优雅关闭）
    server
        .run_with_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl-c");
            tracing::info!("Received shutdown signal");
            job_queue.close();
        })
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
