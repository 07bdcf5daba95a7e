use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    config::VideoConfig,
    errors::StudioError,
    providers::ProviderConfig,
};
use super::client::post_json;
use super::model::{first_present, number};
use super::normalizer::failure_reason;
use super::request::VideoRequest;

pub const RESULT_PATH: &str = "/v1/draw/result";

/// Sora clips default to this length when the request names none
const DEFAULT_SORA_DURATION: u32 = 10;

/// Lifecycle of a provider-side video task
///
/// Variants are declared in lifecycle order; a job only ever moves to a
/// greater variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Map a provider status string; anything unrecognized counts as running
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" | "success" | "completed" | "complete" | "done" => JobStatus::Succeeded,
            "failed" | "error" | "failure" | "fail" | "cancelled" => JobStatus::Failed,
            "queued" | "pending" | "submitted" | "waiting" => JobStatus::Queued,
            _ => JobStatus::Running,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A video task accepted by one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub task_id: String,
    pub provider_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub result_url: Option<String>,
}

impl GenerationJob {
    pub fn new(task_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            provider_id: provider_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            result_url: None,
        }
    }

    /// Apply a poll snapshot without ever moving backwards
    ///
    /// Returns whether anything changed.
    pub fn advance(&mut self, status: JobStatus, progress: Option<u8>) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let before = (self.status, self.progress);
        if status > self.status {
            self.status = status;
        }
        if let Some(progress) = progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if self.status == JobStatus::Succeeded {
            self.progress = 100;
        }
        before != (self.status, self.progress)
    }

    fn succeed(&mut self, url: String) {
        self.advance(JobStatus::Succeeded, Some(100));
        self.result_url = Some(url);
    }
}

/// Request shape families, keyed by model name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFamily {
    /// Edits a source clip, optionally guided by a subject image
    Kling,
    /// First/last frame plus an explicit duration
    Sora,
    /// First/last frame only
    Veo,
}

impl VideoFamily {
    pub fn for_model(model: &str) -> Self {
        let model = model.trim().to_ascii_lowercase();
        if model.starts_with("kling") {
            VideoFamily::Kling
        } else if model.starts_with("sora") {
            VideoFamily::Sora
        } else {
            VideoFamily::Veo
        }
    }

    pub fn submit_path(self) -> &'static str {
        match self {
            VideoFamily::Kling => "/v1/video/kling",
            VideoFamily::Sora => "/v1/video/sora-video",
            VideoFamily::Veo => "/v1/video/veo",
        }
    }

    /// 构建任务提交请求体
    ///
    /// ## 各模型族的请求格式
    /// - Kling: `{model, prompt, video_url, aspect_ratio, image_url?, duration?}`，必须提供源视频
    /// - Sora: `{model, prompt, aspect_ratio, duration, images?}`
    /// - Veo: `{model, prompt, aspect_ratio, images?}`
    ///
    /// `images` 依次为首帧和尾帧
    pub fn submission_body(self, model: &str, request: &VideoRequest) -> Result<Value, StudioError> {
        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
            "aspect_ratio": request.aspect_ratio,
        });

        match self {
            VideoFamily::Kling => {
                let source = request
                    .source_video_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        StudioError::invalid_request(format!("model '{}' edits a clip and needs a source video", model))
                    })?;
                body["video_url"] = json!(source);
                if let Some(subject) = non_empty(&request.subject_url) {
                    body["image_url"] = json!(subject);
                }
                if let Some(duration) = request.duration {
                    body["duration"] = json!(duration);
                }
            }
            VideoFamily::Sora => {
                body["duration"] = json!(request.duration.unwrap_or(DEFAULT_SORA_DURATION));
                attach_frames(&mut body, request);
            }
            VideoFamily::Veo => attach_frames(&mut body, request),
        }

        Ok(body)
    }
}

fn attach_frames(body: &mut Value, request: &VideoRequest) {
    let frames: Vec<&str> = [non_empty(&request.image_url), non_empty(&request.last_frame_url)]
        .into_iter()
        .flatten()
        .collect();
    if !frames.is_empty() {
        body["images"] = json!(frames);
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Task id from a submission response
pub fn task_id(response: &Value) -> Option<String> {
    let data = response.get("data");
    [
        data.and_then(|d| d.get("id")),
        response.get("id"),
        response.get("task_id"),
        data.and_then(|d| d.get("task_id")),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// One parsed status response
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub status: JobStatus,
    /// Raw provider status, lowercased
    pub raw_status: String,
    pub progress: Option<u8>,
    pub url: Option<String>,
    pub failure: Option<String>,
}

impl PollSnapshot {
    /// Read `{code, data: {...}}` or a flat body
    pub fn from_value(value: &Value) -> Self {
        let body = value.get("data").filter(|d| d.is_object()).unwrap_or(value);

        let raw_status = body
            .get("status")
            .or_else(|| value.get("status"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let status = JobStatus::parse(&raw_status);

        let progress = body
            .get("progress")
            .and_then(number)
            .map(|p| p.clamp(0.0, 100.0).round() as u8);

        let failure = (status == JobStatus::Failed).then(|| failure_reason(body));

        Self {
            status,
            raw_status,
            progress,
            url: result_url(body),
            failure,
        }
    }
}

/// Video URL: `results[0].url` first, then flat url fields
pub fn result_url(body: &Value) -> Option<String> {
    let from_results = body
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| match first {
            Value::String(s) => Some(s.as_str()),
            other => first_present(other, &["url", "video_url"]).and_then(Value::as_str),
        });

    from_results
        .or_else(|| first_present(body, &["url", "video_url"]).and_then(Value::as_str))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Submit a video job on one provider and poll it to a terminal state
///
/// ## 内部实现逻辑
/// 1. 提交任务；若提交响应已是成功状态且带有URL，直接返回
/// 2. 回调 `on_progress(0, "queued")`
/// 3. 每个轮询间隔先休眠再 `POST /v1/draw/result {id}`，每次解析成功都回调进度
/// 4. 成功且带URL：返回；成功但无URL：继续轮询；失败：返回提供商给出的原因
/// 5. 轮询请求本身出错只记录日志，不中断任务
/// 6. 超过最大轮询次数：返回 `Timeout`
pub async fn run_job<F>(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    request: &VideoRequest,
    settings: &VideoConfig,
    on_progress: &F,
) -> Result<String, StudioError>
where
    F: Fn(u8, &str) + Send + Sync + ?Sized,
{
    let model = request
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&provider.video_model);
    let family = VideoFamily::for_model(model);
    let body = family.submission_body(model, request)?;

    tracing::info!(
        provider_id = %provider.provider_id,
        model = model,
        family = ?family,
        "Submitting video job"
    );
    let submitted = post_json(http, provider, family.submit_path(), &body).await?;

    let snapshot = PollSnapshot::from_value(&submitted);
    if snapshot.status == JobStatus::Succeeded {
        if let Some(url) = snapshot.url {
            on_progress(100, JobStatus::Succeeded.as_str());
            return Ok(url);
        }
    }
    if let Some(reason) = snapshot.failure {
        return Err(StudioError::GenerationFailed(reason));
    }

    let task_id = task_id(&submitted).ok_or_else(|| {
        StudioError::malformed(format!("video submission returned no task id: {}", submitted))
    })?;
    let mut job = GenerationJob::new(task_id, provider.provider_id.clone());
    on_progress(0, JobStatus::Queued.as_str());

    poll_job(http, provider, &mut job, settings, on_progress).await
}

/// Poll an accepted job until it succeeds, fails or the poll ceiling is hit
pub async fn poll_job<F>(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    job: &mut GenerationJob,
    settings: &VideoConfig,
    on_progress: &F,
) -> Result<String, StudioError>
where
    F: Fn(u8, &str) + Send + Sync + ?Sized,
{
    let request = json!({ "id": job.task_id });

    for attempt in 1..=settings.max_poll_attempts {
        tokio::time::sleep(settings.poll_interval()).await;

        let response = match post_json(http, provider, RESULT_PATH, &request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    task_id = %job.task_id,
                    provider_id = %job.provider_id,
                    attempt = attempt,
                    error = %e,
                    "Video status poll failed, will retry"
                );
                continue;
            }
        };

        let snapshot = PollSnapshot::from_value(&response);
        tracing::debug!(
            task_id = %job.task_id,
            status = %snapshot.raw_status,
            progress = ?snapshot.progress,
            attempt = attempt,
            "Video status polled"
        );

        match snapshot.status {
            JobStatus::Succeeded => match snapshot.url {
                Some(url) => {
                    job.succeed(url.clone());
                    on_progress(job.progress, job.status.as_str());
                    tracing::info!(task_id = %job.task_id, attempts = attempt, "Video job succeeded");
                    return Ok(url);
                }
                None => {
                    job.advance(JobStatus::Running, snapshot.progress);
                    on_progress(job.progress, job.status.as_str());
                }
            },
            JobStatus::Failed => {
                job.advance(JobStatus::Failed, snapshot.progress);
                on_progress(job.progress, job.status.as_str());
                let reason = snapshot.failure.unwrap_or_else(|| "video generation failed".to_string());
                tracing::warn!(task_id = %job.task_id, reason = %reason, "Video job failed");
                return Err(StudioError::GenerationFailed(reason));
            }
            status => {
                job.advance(status, snapshot.progress);
                on_progress(job.progress, job.status.as_str());
            }
        }
    }

    Err(StudioError::Timeout(format!(
        "video task {} did not finish after {} polls",
        job.task_id, settings.max_poll_attempts
    )))
}
