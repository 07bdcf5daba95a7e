use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// Storyboard data structures exchanged with the browser UI.
// Model replies are loose: fields go missing, numbers arrive as strings and
// nulls show up where text belongs, so every field deserializes leniently.

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryboardData {
    #[serde(deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(deserialize_with = "lenient::string")]
    pub synopsis: String,
    #[serde(deserialize_with = "lenient::list")]
    pub characters: Vec<Character>,
    #[serde(deserialize_with = "lenient::list")]
    pub scenes: Vec<Scene>,
    #[serde(deserialize_with = "lenient::list")]
    pub shots: Vec<Shot>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Character {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(deserialize_with = "lenient::string")]
    pub appearance: String,
    #[serde(deserialize_with = "lenient::string")]
    pub image_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub image_prompt_en: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(deserialize_with = "lenient::string")]
    pub image_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub image_prompt_en: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A unit of storyboard work
///
/// Text fields come in pairs: the story's own language and English. The
/// three prompt pairs feed text-to-image, image-to-video and text-to-video.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Shot {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(deserialize_with = "lenient::u32")]
    pub shot_number: u32,

    #[serde(deserialize_with = "lenient::string")]
    pub content: String,
    #[serde(deserialize_with = "lenient::string")]
    pub content_en: String,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(deserialize_with = "lenient::string")]
    pub description_en: String,
    #[serde(deserialize_with = "lenient::string")]
    pub narration: String,
    #[serde(deserialize_with = "lenient::string")]
    pub narration_en: String,

    #[serde(deserialize_with = "lenient::string")]
    pub shot_size: String,
    #[serde(deserialize_with = "lenient::string")]
    pub camera_movement: String,
    /// Seconds
    #[serde(deserialize_with = "lenient::f64")]
    pub duration: f64,

    #[serde(deserialize_with = "lenient::string")]
    pub t2i_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub t2i_prompt_en: String,
    #[serde(deserialize_with = "lenient::string")]
    pub i2v_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub i2v_prompt_en: String,
    #[serde(deserialize_with = "lenient::string")]
    pub t2v_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub t2v_prompt_en: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub is_generating_image: bool,
    pub is_generating_video: bool,
    #[serde(deserialize_with = "lenient::u32")]
    pub generation_progress: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ComicData {
    #[serde(deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(deserialize_with = "lenient::string")]
    pub style: String,
    #[serde(deserialize_with = "lenient::list")]
    pub panels: Vec<ComicPanel>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ComicPanel {
    #[serde(deserialize_with = "lenient::u32")]
    pub panel_number: u32,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(deserialize_with = "lenient::string")]
    pub dialogue: String,
    #[serde(deserialize_with = "lenient::string")]
    pub image_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub image_prompt_en: String,
}

impl StoryboardData {
    /// Fill ids and shot numbers the model left out
    pub fn normalize(&mut self) {
        for character in &mut self.characters {
            if character.id.trim().is_empty() {
                character.id = uuid::Uuid::new_v4().to_string();
            }
        }
        for scene in &mut self.scenes {
            if scene.id.trim().is_empty() {
                scene.id = uuid::Uuid::new_v4().to_string();
            }
        }
        for (index, shot) in self.shots.iter_mut().enumerate() {
            if shot.id.trim().is_empty() {
                shot.id = uuid::Uuid::new_v4().to_string();
            }
            if shot.shot_number == 0 {
                shot.shot_number = index as u32 + 1;
            }
        }
    }
}

impl ComicData {
    pub fn normalize(&mut self) {
        for (index, panel) in self.panels.iter_mut().enumerate() {
            if panel.panel_number == 0 {
                panel.panel_number = index as u32 + 1;
            }
        }
    }
}

/// Pick whichever of the keys holds a non-empty value
pub(crate) fn first_present<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|v| !v.is_null())
}

mod lenient {
    use super::*;

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        })
    }

    pub fn f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(super::number(&Value::deserialize(deserializer)?).unwrap_or(0.0))
    }

    pub fn u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        Ok(super::number(&Value::deserialize(deserializer)?)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round().min(u32::MAX as f64) as u32)
            .unwrap_or(0))
    }

    /// A list where malformed entries are dropped instead of failing the whole reply
    pub fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: serde::de::DeserializeOwned,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }
}

/// Number from a JSON number or a numeric string such as `"4"`, `"4.5s"`, `"55%"`
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let numeric: String = trimmed
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            numeric.parse::<f64>().ok()
        }
        _ => None,
    }
}
