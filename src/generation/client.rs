use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use crate::{
    config::VideoConfig,
    errors::StudioError,
    providers::{FailoverDispatcher, ProviderConfig},
};
use super::{
    model::{Character, ComicData, StoryboardData},
    normalizer::extract_image_artifact,
    prompts::{self, JSON_SYSTEM_PROMPT, PROMPT_OPTIMIZER_SYSTEM_PROMPT},
    reply::{clean_text_reply, parse_json_reply, parse_reply_as, preview},
    request::{AnalyzeOptions, ImageRequest, VideoRequest, image_size_for},
    video,
};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const IMAGE_GENERATIONS_PATH: &str = "/v1/images/generations";
pub const NANO_BANANA_PATH: &str = "/v1/draw/nano-banana";

/// Public generation operations, each routed through the failover dispatcher
///
/// Every operation re-reads the provider handed to it by the dispatcher, so a
/// retry after rotation is a complete request against the new provider.
#[derive(Clone)]
pub struct GenerationClient {
    dispatcher: FailoverDispatcher,
    http: reqwest::Client,
    video: VideoConfig,
}

impl GenerationClient {
    pub fn new(dispatcher: FailoverDispatcher, http: reqwest::Client, video: VideoConfig) -> Self {
        Self { dispatcher, http, video }
    }

    pub fn dispatcher(&self) -> &FailoverDispatcher {
        &self.dispatcher
    }

    /// 剧本分析：把一段故事拆成角色、场景和镜头
    ///
    /// ## 内部实现逻辑
    /// 1. 替换 `@角色名` 引用并拼接提示词
    /// 2. 以 JSON 模式发送一次聊天补全请求
    /// 3. 宽松解析回复（直接解析、代码块、花括号子串），补齐缺失的 id 和镜头编号
    pub async fn analyze_script(&self, text: &str, options: &AnalyzeOptions) -> Result<StoryboardData, StudioError> {
        require_text("story text", text)?;
        let prompt = prompts::storyboard_prompt(text, options);
        let prompt = prompt.as_str();

        self.dispatcher
            .run("analyze_script", move |provider| async move {
                let reply = self.chat(&provider, JSON_SYSTEM_PROMPT, prompt, true).await?;
                let mut storyboard: StoryboardData = parse_reply_as(&reply)?;
                storyboard.normalize();
                tracing::info!(
                    provider_id = %provider.provider_id,
                    shots = storyboard.shots.len(),
                    characters = storyboard.characters.len(),
                    "Storyboard analyzed"
                );
                Ok(storyboard)
            })
            .await
    }

    /// Generate one image and return it as a URL or data URI
    pub async fn generate_image(&self, request: &ImageRequest) -> Result<String, StudioError> {
        require_text("prompt", &request.prompt)?;

        self.dispatcher
            .run("generate_image", move |provider| async move {
                let model = request
                    .model
                    .as_deref()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(&provider.image_model);
                let (path, body) = image_submission(model, request);

                let (bytes, content_type) = post_raw(&self.http, &provider, path, &body).await?;
                let artifact = extract_image_artifact(&bytes, content_type.as_deref())?;
                tracing::info!(
                    provider_id = %provider.provider_id,
                    model = model,
                    artifact = %preview(&artifact, 80),
                    "Image generated"
                );
                Ok(artifact)
            })
            .await
    }

    /// Submit a video job and poll it to completion, reporting `(progress, status)`
    pub async fn generate_video<F>(&self, request: &VideoRequest, on_progress: F) -> Result<String, StudioError>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        let on_progress = &on_progress;

        self.dispatcher
            .run("generate_video", move |provider| async move {
                video::run_job(&self.http, &provider, request, &self.video, on_progress).await
            })
            .await
    }

    /// The reply may be a bare array or an object with `characters`
    pub async fn extract_characters(&self, text: &str) -> Result<Vec<Character>, StudioError> {
        require_text("text", text)?;
        let prompt = prompts::characters_prompt(text);
        let prompt = prompt.as_str();

        self.dispatcher
            .run("extract_characters", move |provider| async move {
                let reply = self.chat(&provider, JSON_SYSTEM_PROMPT, prompt, true).await?;
                let value = parse_json_reply(&reply)?;
                let list = match &value {
                    Value::Array(_) => value.clone(),
                    other => other.get("characters").cloned().ok_or_else(|| {
                        StudioError::Parse(format!("reply has no characters list: {}", preview(&reply, 200)))
                    })?,
                };

                let mut characters: Vec<Character> = match list {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|item| serde_json::from_value(item).ok())
                        .collect(),
                    _ => return Err(StudioError::Parse("characters is not a list".to_string())),
                };
                for character in &mut characters {
                    if character.id.trim().is_empty() {
                        character.id = uuid::Uuid::new_v4().to_string();
                    }
                }
                Ok(characters)
            })
            .await
    }

    pub async fn generate_comic_script(&self, topic: &str, style: &str) -> Result<ComicData, StudioError> {
        require_text("topic", topic)?;
        let prompt = prompts::comic_prompt(topic, style);
        let prompt = prompt.as_str();

        self.dispatcher
            .run("generate_comic_script", move |provider| async move {
                let reply = self.chat(&provider, JSON_SYSTEM_PROMPT, prompt, true).await?;
                let mut comic: ComicData = parse_reply_as(&reply)?;
                if comic.style.trim().is_empty() {
                    comic.style = style.to_string();
                }
                comic.normalize();
                Ok(comic)
            })
            .await
    }

    pub async fn optimize_image_prompt(&self, text: &str) -> Result<String, StudioError> {
        require_text("prompt", text)?;
        let prompt = prompts::optimize_prompt(text);
        let prompt = prompt.as_str();

        self.dispatcher
            .run("optimize_image_prompt", move |provider| async move {
                let reply = self.chat(&provider, PROMPT_OPTIMIZER_SYSTEM_PROMPT, prompt, false).await?;
                let optimized = clean_text_reply(&reply);
                if optimized.is_empty() {
                    return Err(StudioError::malformed("model returned an empty prompt"));
                }
                Ok(optimized)
            })
            .await
    }

    /// One chat completion; returns the reply text
    async fn chat(&self, provider: &ProviderConfig, system: &str, user: &str, json_mode: bool) -> Result<String, StudioError> {
        let mut body = json!({
            "model": provider.text_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = post_json(&self.http, provider, CHAT_COMPLETIONS_PATH, &body).await?;
        message_content(&response).ok_or_else(|| {
            StudioError::malformed(format!(
                "chat completion from '{}' has no message content: {}",
                provider.provider_id,
                preview(&response.to_string(), 300)
            ))
        })
    }
}

/// Endpoint and body for an image request
///
/// The `nano-banana` family has a dedicated draw endpoint; everything else
/// uses the OpenAI-style generations endpoint.
pub fn image_submission(model: &str, request: &ImageRequest) -> (&'static str, Value) {
    let size = image_size_for(&request.aspect_ratio);
    let reference = request.ref_image.as_deref().filter(|r| !r.trim().is_empty());

    if model.trim().to_ascii_lowercase().starts_with("nano-banana") {
        let mut body = json!({
            "prompt": request.prompt,
            "size": size,
            "model": model,
        });
        if let Some(reference) = reference {
            body["urls"] = json!([reference]);
        }
        return (NANO_BANANA_PATH, body);
    }

    let mut body = json!({
        "model": model,
        "prompt": request.prompt,
        "n": 1,
        "size": size,
    });
    if let Some(reference) = reference {
        body["image"] = json!(reference);
    }
    if let Some(mask) = request.mask_image.as_deref().filter(|m| !m.trim().is_empty()) {
        body["mask"] = json!(mask);
    }
    (IMAGE_GENERATIONS_PATH, body)
}

/// `choices[0].message.content` as a string or a list of text parts
pub fn message_content(response: &Value) -> Option<String> {
    match response.pointer("/choices/0/message/content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str).or_else(|| part.as_str()))
                .collect();
            (!text.is_empty()).then(|| text.concat())
        }
        _ => None,
    }
}

/// Fail before any request when the profile cannot authenticate
pub(crate) fn ensure_ready(provider: &ProviderConfig) -> Result<(), StudioError> {
    if provider.base_url.trim().is_empty() {
        return Err(StudioError::configuration(format!(
            "provider '{}' has no base URL",
            provider.provider_id
        )));
    }
    if provider.api_key.trim().is_empty() {
        return Err(StudioError::configuration(format!(
            "provider '{}' has no API key",
            provider.provider_id
        )));
    }
    Ok(())
}

/// POST a JSON body to a provider path; returns the raw body and content type
pub(crate) async fn post_raw(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    path: &str,
    body: &Value,
) -> Result<(Vec<u8>, Option<String>), StudioError> {
    ensure_ready(provider)?;
    let url = provider.endpoint(path);
    tracing::debug!(provider_id = %provider.provider_id, url = %url, "Sending provider request");

    let response = http
        .post(&url)
        .bearer_auth(provider.api_key.trim())
        .header(CONTENT_TYPE, "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| StudioError::transport(&provider.provider_id, e.status().map(|s| s.as_u16()), e.to_string()))?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StudioError::transport(&provider.provider_id, Some(status.as_u16()), e.to_string()))?;

    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        return Err(StudioError::transport(
            &provider.provider_id,
            Some(status.as_u16()),
            preview(text.trim(), 500),
        ));
    }

    Ok((bytes.to_vec(), content_type))
}

pub(crate) async fn post_json(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    path: &str,
    body: &Value,
) -> Result<Value, StudioError> {
    let (bytes, _) = post_raw(http, provider, path, body).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        StudioError::malformed(format!(
            "'{}' returned non-JSON from {}: {} ({})",
            provider.provider_id,
            path,
            preview(String::from_utf8_lossy(&bytes).trim(), 200),
            e
        ))
    })
}

fn require_text(field: &str, value: &str) -> Result<(), StudioError> {
    if value.trim().is_empty() {
        return Err(StudioError::invalid_request(format!("{} must not be empty", field)));
    }
    Ok(())
}
