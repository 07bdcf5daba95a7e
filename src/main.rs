use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use storyboard_studio::{
    config::{DEFAULT_CONFIG_FILE, LoggingConfig},
    load_config,
    providers::{FileStore, ProviderRegistry},
    start_server,
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Parser, Debug)]
#[command(name = "storyboard-studio")]
#[command(about = "Multi-provider storyboard, image and video generation service", long_about = None)]
struct Args {
    /// Configuration file (TOML); missing files fall back to defaults
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

/// 主函数 - 服务入口
///
/// 加载配置、初始化日志、从存储文件恢复提供商配置，然后启动HTTP服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_tracing(&config.logging)?;

    tracing::info!(
        config_file = %args.config.display(),
        storage = %config.storage.path.display(),
        "Storyboard studio starting up"
    );

    let store = Arc::new(FileStore::new(config.storage.path.clone()));
    let registry = ProviderRegistry::load(store)
        .await
        .context("Failed to load provider profiles")?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        providers_count = registry.provider_count().await,
        "Configuration loaded successfully"
    );

    start_server(config, Arc::new(registry)).await
}

/// 初始化结构化日志系统
///
/// `RUST_LOG` 优先；否则使用配置中的级别。输出格式由 `logging.format` 决定：
/// `json`（默认）、`pretty` 或 `compact`
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("storyboard_studio={},tower_http=debug", logging.level))
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match logging.format.as_str() {
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        "compact" => registry.with(fmt::layer().compact().with_target(false)).try_init(),
        _ => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .json(),
            )
            .try_init(),
    };
    result.context("Failed to initialize tracing")?;

    tracing::info!(format = %logging.format, "Structured logging system initialized");
    Ok(())
}
