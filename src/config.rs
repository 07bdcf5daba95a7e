use serde::{Deserialize, Serialize};
use figment::{Figment, providers::{Format, Toml, Env, Serialized}};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_FILE: &str = "studio.toml";

/// 主配置结构体
///
/// 服务本身的运行参数。提供商配置不在这里：它们由用户在界面中录入，
/// 并通过 `ProviderRegistry` 持久化到存储文件中
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// 本地HTTP服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 提供商配置存储位置
    #[serde(default)]
    pub storage: StorageConfig,
    /// 出站HTTP客户端配置
    #[serde(default)]
    pub http: HttpConfig,
    /// 故障转移配置
    #[serde(default)]
    pub failover: FailoverConfig,
    /// 视频任务轮询配置
    #[serde(default)]
    pub video: VideoConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageConfig {
    /// JSON文件路径，保存提供商配置映射
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HttpConfig {
    /// 单次请求超时（秒），0 表示只依赖传输层自身的超时
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_seconds: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FailoverConfig {
    /// 包括首次调用在内的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// 已结束的任务记录保留时长（秒）
    #[serde(default = "default_job_retention_seconds")]
    pub job_retention_seconds: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8787 }
fn default_storage_path() -> PathBuf { PathBuf::from("studio-data.json") }
fn default_request_timeout() -> u64 { 300 }
fn default_pool_idle_timeout() -> u64 { 90 }
fn default_max_attempts() -> u32 { 3 }
fn default_poll_interval_ms() -> u64 { 5_000 }
fn default_max_poll_attempts() -> u32 { 360 } // 5秒间隔约30分钟
fn default_job_retention_seconds() -> u64 { 3_600 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            pool_idle_timeout_seconds: default_pool_idle_timeout(),
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts() }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            job_retention_seconds: default_job_retention_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl VideoConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_seconds)
    }
}

impl HttpConfig {
    /// 构建共享的出站HTTP客户端
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_seconds));
        if self.request_timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(self.request_timeout_seconds));
        }
        builder.build().context("Failed to create HTTP client")
    }
}

/// 加载配置文件和环境变量
///
/// ## 功能说明
/// 依次合并内置默认值、TOML配置文件（不存在时忽略）和以 `STUDIO_` 为前缀的环境变量，
/// 后者覆盖前者。嵌套字段使用双下划线，例如 `STUDIO_VIDEO__POLL_INTERVAL_MS=1000`
///
/// ## 执行例子
/// ```rust,no_run
/// let config = storyboard_studio::load_config("studio.toml")?;
/// println!("Listening on {}:{}", config.server.host, config.server.port);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STUDIO_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {} or environment variables", path.display()))?;

    // 验证加载的配置是否有效
    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

impl Config {
    /// 验证整个配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.server.validate()
            .context("Server configuration validation failed")?;

        if self.storage.path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Storage path cannot be empty"));
        }

        // 验证故障转移配置
        if self.failover.max_attempts == 0 {
            return Err(anyhow::anyhow!("Failover max attempts must be greater than 0"));
        }
        if self.failover.max_attempts > 10 {
            return Err(anyhow::anyhow!("Failover max attempts cannot exceed 10"));
        }

        self.video.validate()
            .context("Video configuration validation failed")?;

        self.logging.validate()
            .context("Logging configuration validation failed")?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        for origin in &self.allowed_origins {
            // 源地址必须是通配符或有效URL
            if origin != "*" && !origin.starts_with("http://") && !origin.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "Allowed origin '{}' must be '*' or start with http:// or https://",
                    origin
                ));
            }
        }

        Ok(())
    }
}

impl VideoConfig {
    /// 验证轮询参数
    ///
    /// ## 参数验证规则
    /// - `poll_interval_ms`: 大于0且不超过60秒
    /// - `max_poll_attempts`: 大于0
    /// - `job_retention_seconds`: 大于0
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        if self.poll_interval_ms > 60_000 {
            return Err(anyhow::anyhow!("Poll interval cannot exceed 60000 ms"));
        }

        if self.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("Max poll attempts must be greater than 0"));
        }

        if self.job_retention_seconds == 0 {
            return Err(anyhow::anyhow!("Job retention must be greater than 0 seconds"));
        }

        Ok(())
    }
}

impl LoggingConfig {
    /// 验证日志配置参数
    ///
    /// ## 参数验证规则
    /// - `level`: 必须是 "trace", "debug", "info", "warn", "error" 之一
    /// - `format`: 必须是 "json", "pretty", "compact" 之一
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}': must be one of {:?}",
                self.level, valid_levels
            ));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}': must be one of {:?}",
                self.format, valid_formats
            ));
        }

        Ok(())
    }
}
