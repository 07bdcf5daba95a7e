pub mod endpoint;
pub mod failover;
pub mod registry;
pub mod store;

use serde::{Deserialize, Serialize};

// Re-export the pieces callers reach for most
pub use endpoint::resolve;
pub use failover::FailoverDispatcher;
pub use registry::ProviderRegistry;
pub use store::{FileStore, MemoryStore, ProfileStore};

/// Rotation order used by failover; unlisted providers follow in registry order
pub const PROVIDER_PRIORITY: &[&str] = &["gemini", "yunwu", "t8star", "tuzi"];

/// Provider seeded when nothing has been configured yet
pub const DEFAULT_PROVIDER_ID: &str = "yunwu";
pub const DEFAULT_BASE_URL: &str = "https://yunwu.ai";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "nano-banana";
pub const DEFAULT_VIDEO_MODEL: &str = "veo3-fast";

/// One configuration profile per provider
///
/// Serialized in camelCase so profiles saved by the browser UI load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider_id: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_video_model")]
    pub video_model: String,
}

fn default_text_model() -> String { DEFAULT_TEXT_MODEL.to_string() }
fn default_image_model() -> String { DEFAULT_IMAGE_MODEL.to_string() }
fn default_video_model() -> String { DEFAULT_VIDEO_MODEL.to_string() }

impl ProviderConfig {
    pub fn new(provider_id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            video_model: default_video_model(),
        }
    }

    /// The profile seeded on first start, with an empty API key
    pub fn seed_default() -> Self {
        Self::new(DEFAULT_PROVIDER_ID, DEFAULT_BASE_URL, "")
    }

    /// Full URL for a logical API path on this provider
    pub fn endpoint(&self, path: &str) -> String {
        resolve(&self.base_url, path)
    }

    /// API key with everything but the last four characters hidden
    pub fn masked_api_key(&self) -> String {
        let count = self.api_key.chars().count();
        if count <= 4 {
            return "*".repeat(count);
        }
        let tail: String = self.api_key.chars().skip(count - 4).collect();
        format!("{}{}", "*".repeat(count - 4), tail)
    }

    /// Copy safe to hand back to the UI
    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.masked_api_key(),
            ..self.clone()
        }
    }
}
