use regex::Regex;

use super::request::{AnalyzeOptions, CharacterReference, ShotCount, StoryMode};

/// System message for every JSON-producing call
pub const JSON_SYSTEM_PROMPT: &str = "You are a professional film storyboard artist and screenwriter. \
Always answer with a single valid JSON value and nothing else: no markdown, no commentary.";

pub const PROMPT_OPTIMIZER_SYSTEM_PROMPT: &str = "You rewrite image generation prompts. \
Answer with the improved English prompt only, on one line, without quotes or explanations.";

/// Replace `@name` mentions with the canonical library name.
///
/// Matching is case-insensitive and longer names win, so `@Ann` does not
/// swallow the start of `@Anna`.
pub fn substitute_mentions(text: &str, library: &[CharacterReference]) -> String {
    let mut names: Vec<&str> = library
        .iter()
        .map(|c| c.name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.chars().count()));

    let mut result = text.to_string();
    for name in names {
        let Ok(pattern) = Regex::new(&format!("(?i)@{}", regex::escape(name))) else {
            continue;
        };
        result = pattern.replace_all(&result, regex::NoExpand(name)).into_owned();
    }
    result
}

/// 构建剧本分析提示词
///
/// 将用户文本、类型、风格、镜头数量策略、画幅、发散/严格模式和参考角色库拼成一条请求
pub fn storyboard_prompt(text: &str, options: &AnalyzeOptions) -> String {
    let story = substitute_mentions(text, &options.characters);

    let shot_policy = match options.shot_count {
        ShotCount::Auto => "Choose the number of shots the story naturally needs.".to_string(),
        ShotCount::Fixed(n) => format!("Produce exactly {} shots.", n),
    };

    let mode = match options.mode {
        StoryMode::Strict => {
            "Stay faithful to the text. Do not invent events, characters or dialogue that are not implied by it."
        }
        StoryMode::Divergent => {
            "You may enrich the story with additional beats, visual details and transitions as long as the core plot is kept."
        }
    };

    let mut prompt = String::new();
    prompt.push_str("Turn the following story into a production storyboard.\n\n");
    prompt.push_str(&format!("Genre: {}\n", options.genre.as_deref().unwrap_or("any")));
    prompt.push_str(&format!("Visual style: {}\n", options.style.as_deref().unwrap_or("cinematic")));
    prompt.push_str(&format!("Aspect ratio: {}\n", options.aspect_ratio));
    prompt.push_str(&format!("Shot count: {}\n", shot_policy));
    prompt.push_str(&format!("Mode: {}\n", mode));

    if !options.characters.is_empty() {
        prompt.push_str("\nReference characters (reuse these names and looks exactly):\n");
        for character in &options.characters {
            prompt.push_str(&format!("- {}: {}\n", character.name.trim(), character.description.trim()));
        }
    }

    prompt.push_str(
        r#"
Return one JSON object with this shape:
{
  "title": string,
  "synopsis": string,
  "characters": [{"name", "description", "appearance", "imagePrompt", "imagePromptEn"}],
  "scenes": [{"name", "description", "imagePrompt", "imagePromptEn"}],
  "shots": [{
    "shotNumber": number,
    "content", "contentEn",
    "description", "descriptionEn",
    "narration", "narrationEn",
    "shotSize", "cameraMovement",
    "duration": seconds,
    "t2iPrompt", "t2iPromptEn",
    "i2vPrompt", "i2vPromptEn",
    "t2vPrompt", "t2vPromptEn"
  }]
}
Fields without the En suffix use the story's language; En fields are English.
Prompts must describe the frame concretely (subject, action, setting, lighting, lens) and repeat each character's appearance.

Story:
"#,
    );
    prompt.push_str(&story);
    prompt
}

pub fn characters_prompt(text: &str) -> String {
    format!(
        r#"List every character that appears in the text below.
Return a JSON object {{"characters": [{{"name", "description", "appearance", "imagePrompt", "imagePromptEn"}}]}}.
"appearance" covers age, build, face, hair and clothing. "imagePromptEn" is an English full-body portrait prompt on a plain background.

Text:
{}"#,
        text
    )
}

pub fn comic_prompt(topic: &str, style: &str) -> String {
    format!(
        r#"Write a short comic script about: {}
Art style: {}
Return a JSON object {{"title", "style", "panels": [{{"panelNumber", "description", "dialogue", "imagePrompt", "imagePromptEn"}}]}} with 4 to 8 panels.
"imagePromptEn" is an English image prompt for the panel that includes the art style."#,
        topic, style
    )
}

pub fn optimize_prompt(text: &str) -> String {
    format!(
        "Improve this image generation prompt. Keep its intent, add concrete composition, lighting, lens and style details, translate to English if needed.\n\nPrompt:\n{}",
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Vec<CharacterReference> {
        vec![
            CharacterReference { name: "Ann".into(), description: "a courier".into(), image_url: None },
            CharacterReference { name: "Anna Li".into(), description: "a pilot".into(), image_url: None },
        ]
    }

    #[test]
    fn test_substitute_mentions_prefers_longer_names() {
        let text = "@anna li waves at @ANN while $1 coins fall";
        assert_eq!(
            substitute_mentions(text, &library()),
            "Anna Li waves at Ann while $1 coins fall"
        );
    }

    #[test]
    fn test_storyboard_prompt_embeds_options() {
        let options = AnalyzeOptions {
            genre: Some("noir".into()),
            shot_count: ShotCount::Fixed(6),
            mode: StoryMode::Divergent,
            characters: library(),
            ..AnalyzeOptions::default()
        };
        let prompt = storyboard_prompt("@ann runs through the rain", &options);

        assert!(prompt.contains("Genre: noir"));
        assert!(prompt.contains("exactly 6 shots"));
        assert!(prompt.contains("enrich the story"));
        assert!(prompt.contains("- Anna Li: a pilot"));
        assert!(prompt.ends_with("Ann runs through the rain"));
    }
}
