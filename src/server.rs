use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    config::Config,
    errors::{StudioError, StudioResult},
    generation::{
        AnalyzeOptions, Character, ComicData, GenerationClient, ImageRequest, JobStatus, StoryboardData,
        VideoRequest,
    },
    metrics::{MetricsCollector, MetricsSummary},
    middleware::logging_middleware,
    providers::{FailoverDispatcher, ProviderConfig, ProviderRegistry},
};

/// Video jobs submitted through the service, by job id
pub type JobMap = Arc<RwLock<HashMap<Uuid, VideoJobRecord>>>;

/// 应用程序状态 - 在所有请求处理器之间共享
#[derive(Clone)]
pub struct AppState {
    /// 应用程序配置（只读共享）
    pub config: Arc<Config>,
    /// 提供商注册表
    pub registry: Arc<ProviderRegistry>,
    /// 生成客户端，所有调用都经过故障转移
    pub client: GenerationClient,
    pub metrics: MetricsCollector,
    pub jobs: JobMap,
}

impl AppState {
    pub fn new(config: Config, registry: Arc<ProviderRegistry>) -> anyhow::Result<Self> {
        let http = config.http.build_client()?;
        let metrics = MetricsCollector::new();
        let dispatcher = FailoverDispatcher::new(registry.clone(), config.failover.max_attempts)
            .with_metrics(metrics.clone());
        let client = GenerationClient::new(dispatcher, http, config.video.clone());

        Ok(Self {
            config: Arc::new(config),
            registry,
            client,
            metrics,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

/// The service's view of a video request running in the background
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoJobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJobRecord {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            progress: 0,
            video_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Progress callback payload; status and progress only move forward
    pub fn apply_progress(&mut self, progress: u8, status: &str) {
        if self.status.is_terminal() {
            return;
        }
        let status = JobStatus::parse(status);
        if status > self.status && !status.is_terminal() {
            self.status = status;
        }
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, outcome: StudioResult<String>) {
        match outcome {
            Ok(url) => {
                self.status = JobStatus::Succeeded;
                self.progress = 100;
                self.video_url = Some(url);
            }
            Err(e) => {
                self.status = JobStatus::Failed;
                self.error = Some(e.to_string());
            }
        }
        self.updated_at = Utc::now();
    }

    /// Finished and untouched for at least `retention`
    pub fn is_expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        self.status.is_terminal() && (now - self.updated_at).to_std().is_ok_and(|age| age >= retention)
    }
}

/// Drop finished job records older than `retention`; running jobs are kept
pub fn prune_expired_jobs(jobs: &mut HashMap<Uuid, VideoJobRecord>, retention: Duration) -> usize {
    let now = Utc::now();
    let before = jobs.len();
    jobs.retain(|_, job| !job.is_expired(retention, now));
    before - jobs.len()
}

impl Default for VideoJobRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Provider profiles
        .route("/v1/providers", get(list_providers_handler).put(save_provider_handler))
        .route("/v1/providers/{id}/activate", post(activate_provider_handler))
        // Generation
        .route("/v1/storyboard/analyze", post(analyze_handler))
        .route("/v1/images", post(image_handler))
        .route("/v1/videos", post(submit_video_handler))
        .route("/v1/videos/{id}", get(video_status_handler))
        .route("/v1/characters/extract", post(characters_handler))
        .route("/v1/comics", post(comic_handler))
        .route("/v1/prompts/optimize", post(optimize_prompt_handler))
        .layer(middleware::from_fn_with_state(state.clone(), logging_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() || allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the HTTP server
pub async fn start_server(config: Config, registry: Arc<ProviderRegistry>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, registry)?;
    let app = create_app(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(address = %addr, "Storyboard studio listening");
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

// Request Handlers

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "storyboard-studio",
        "version": env!("CARGO_PKG_VERSION"),
        "providers_configured": state.registry.provider_count().await,
        "active_provider": state.registry.active_provider_id().await,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSummary> {
    Json(state.metrics.get_metrics_summary().await)
}

/// Profiles with API keys masked, plus the active id and availability
async fn list_providers_handler(State(state): State<AppState>) -> Json<Value> {
    let providers: Vec<ProviderConfig> = state
        .registry
        .all_configs()
        .await
        .values()
        .map(ProviderConfig::redacted)
        .collect();

    Json(json!({
        "providers": providers,
        "active": state.registry.active_provider_id().await,
        "availability": state.registry.availability().await,
    }))
}

/// Save a profile and make it active
///
/// The UI only ever sees masked keys; sending the masked form back keeps
/// the stored key.
async fn save_provider_handler(
    State(state): State<AppState>,
    Json(mut config): Json<ProviderConfig>,
) -> StudioResult<Json<ProviderConfig>> {
    if let Some(existing) = state.registry.get_config(config.provider_id.trim()).await {
        if !existing.api_key.is_empty() && config.api_key == existing.masked_api_key() {
            config.api_key = existing.api_key;
        }
    }

    state.registry.set_config(config.clone()).await?;
    Ok(Json(config.redacted()))
}

async fn activate_provider_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StudioResult<Json<ProviderConfig>> {
    let config = state.registry.select(&id).await?;
    Ok(Json(config.redacted()))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub text: String,
    #[serde(flatten)]
    pub options: AnalyzeOptions,
}

async fn analyze_handler(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeBody>,
) -> StudioResult<Json<StoryboardData>> {
    let storyboard = state.client.analyze_script(&body.text, &body.options).await?;
    Ok(Json(storyboard))
}

async fn image_handler(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> StudioResult<Json<Value>> {
    let url = state.client.generate_image(&request).await?;
    Ok(Json(json!({ "url": url })))
}

/// 提交视频生成任务
///
/// ## 功能说明
/// 立即返回 202 和任务记录，生成在后台任务中进行。进度回调通过通道写回任务记录，
/// 客户端通过 `GET /v1/videos/{id}` 轮询
async fn submit_video_handler(
    State(state): State<AppState>,
    Json(request): Json<VideoRequest>,
) -> (StatusCode, Json<VideoJobRecord>) {
    let record = VideoJobRecord::new();
    let id = record.id;
    {
        let mut jobs = state.jobs.write().await;
        let pruned = prune_expired_jobs(&mut jobs, state.config.video.job_retention());
        if pruned > 0 {
            tracing::debug!(pruned = pruned, remaining = jobs.len(), "Pruned expired video job records");
        }
        jobs.insert(id, record.clone());
    }

    let jobs = state.jobs.clone();
    let client = state.client.clone();
    tokio::spawn(async move {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u8, String)>();

        let updater = {
            let jobs = jobs.clone();
            tokio::spawn(async move {
                while let Some((progress, status)) = rx.recv().await {
                    if let Some(record) = jobs.write().await.get_mut(&id) {
                        record.apply_progress(progress, &status);
                    }
                }
            })
        };

        let outcome = client
            .generate_video(&request, move |progress, status| {
                // the receiver only goes away once this job is finished
                let _ = tx.send((progress, status.to_string()));
            })
            .await;

        if let Err(e) = updater.await {
            tracing::warn!(job_id = %id, error = %e, "Video progress updater stopped unexpectedly");
        }

        match &outcome {
            Ok(_) => tracing::info!(job_id = %id, "Video job finished"),
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Video job failed"),
        }
        if let Some(record) = jobs.write().await.get_mut(&id) {
            record.finish(outcome);
        }
    });

    (StatusCode::ACCEPTED, Json(record))
}

async fn video_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> StudioResult<Json<VideoJobRecord>> {
    state
        .jobs
        .read()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| StudioError::JobNotFound(id.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub text: String,
}

async fn characters_handler(
    State(state): State<AppState>,
    Json(body): Json<TextBody>,
) -> StudioResult<Json<Value>> {
    let characters: Vec<Character> = state.client.extract_characters(&body.text).await?;
    Ok(Json(json!({ "characters": characters })))
}

#[derive(Debug, Deserialize)]
pub struct ComicBody {
    pub topic: String,
    #[serde(default = "default_comic_style")]
    pub style: String,
}

fn default_comic_style() -> String {
    "manga".to_string()
}

async fn comic_handler(
    State(state): State<AppState>,
    Json(body): Json<ComicBody>,
) -> StudioResult<Json<ComicData>> {
    let comic = state.client.generate_comic_script(&body.topic, &body.style).await?;
    Ok(Json(comic))
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

async fn optimize_prompt_handler(
    State(state): State<AppState>,
    Json(body): Json<PromptBody>,
) -> StudioResult<Json<Value>> {
    let prompt = state.client.optimize_image_prompt(&body.prompt).await?;
    Ok(Json(json!({ "prompt": prompt })))
}
