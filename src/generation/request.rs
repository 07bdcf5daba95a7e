use serde::{Deserialize, Serialize};

/// Default aspect ratio when the UI sends none
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Pixel size sent to image endpoints for an aspect ratio
///
/// Unknown ratios fall back to a square canvas.
pub fn image_size_for(aspect_ratio: &str) -> &'static str {
    match aspect_ratio.trim() {
        "1:1" => "1024x1024",
        "16:9" => "1024x576",
        "9:16" => "576x1024",
        "3:4" => "768x1024",
        "4:3" => "1024x768",
        _ => "1024x1024",
    }
}

/// How many shots the storyboard should contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShotCount {
    /// Let the model pace the story
    #[default]
    Auto,
    Fixed(u32),
}

// "auto" or a number, as the UI sends it
impl Serialize for ShotCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ShotCount::Auto => serializer.serialize_str("auto"),
            ShotCount::Fixed(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for ShotCount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match super::model::number(&value) {
            Some(n) if n >= 1.0 => ShotCount::Fixed(n.round() as u32),
            _ => ShotCount::Auto,
        })
    }
}

/// Divergent mode lets the model embellish; strict mode stays on the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryMode {
    #[default]
    Strict,
    Divergent,
}

/// Entry of the user's reference character library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterReference {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Options for `analyze_script`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeOptions {
    pub genre: Option<String>,
    pub style: Option<String>,
    pub shot_count: ShotCount,
    pub aspect_ratio: String,
    pub mode: StoryMode,
    pub characters: Vec<CharacterReference>,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            genre: None,
            style: None,
            shot_count: ShotCount::Auto,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            mode: StoryMode::Strict,
            characters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRequest {
    pub prompt: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    /// Overrides the provider's image model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ref_image: Option<String>,
    #[serde(default)]
    pub mask_image: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, aspect_ratio: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: aspect_ratio.into(),
            model: None,
            ref_image: None,
            mask_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub prompt: String,
    /// First frame
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    /// Overrides the provider's video model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub last_frame_url: Option<String>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<u32>,
    /// Clip to edit, required by the multimodal edit family
    #[serde(default)]
    pub source_video_url: Option<String>,
    #[serde(default)]
    pub subject_url: Option<String>,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_url: None,
            aspect_ratio: default_aspect_ratio(),
            model: None,
            last_frame_url: None,
            duration: None,
            source_video_url: None,
            subject_url: None,
        }
    }
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}
