#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{json, Value};
use storyboard_studio::{
    config::VideoConfig,
    providers::{FailoverDispatcher, ProviderConfig, ProviderRegistry},
    GenerationClient,
};
use wiremock::{Request, Respond, ResponseTemplate};

pub const TEST_API_KEY: &str = "sk-test-0000";

pub fn provider(id: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig::new(id, base_url, TEST_API_KEY)
}

/// Polls every 10ms, gives up after `max_poll_attempts`
pub fn fast_video(max_poll_attempts: u32) -> VideoConfig {
    VideoConfig {
        poll_interval_ms: 10,
        max_poll_attempts,
        ..VideoConfig::default()
    }
}

pub fn client_for(configs: Vec<ProviderConfig>) -> (GenerationClient, Arc<ProviderRegistry>) {
    client_with_video(configs, fast_video(5))
}

pub fn client_with_video(configs: Vec<ProviderConfig>, video: VideoConfig) -> (GenerationClient, Arc<ProviderRegistry>) {
    let registry = Arc::new(ProviderRegistry::with_configs(configs));
    let dispatcher = FailoverDispatcher::new(registry.clone(), 3);
    let client = GenerationClient::new(dispatcher, reqwest::Client::new(), video);
    (client, registry)
}

/// OpenAI-style chat completion wrapping `content`
pub fn chat_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

/// Replays responses in order, repeating the last one
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    calls: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn json(bodies: Vec<Value>) -> Self {
        Self::new(
            bodies
                .into_iter()
                .map(|body| ResponseTemplate::new(200).set_body_json(body))
                .collect(),
        )
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.responses.len() - 1);
        self.responses[index].clone()
    }
}
