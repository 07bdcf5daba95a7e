use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::StudioError;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*\n?(.*?)```").expect("fenced block pattern is valid")
});

/// Parse a model's JSON reply, tolerating the usual wrapping.
///
/// Tries, in order: the reply as-is, the contents of the first fenced code
/// block, and the outermost `{...}` (or `[...]`) substring.
pub fn parse_json_reply(reply: &str) -> Result<Value, StudioError> {
    let trimmed = reply.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) {
            return Ok(value);
        }
    }

    // the bracket that opens first encloses the other
    let mut pairs = [('{', '}'), ('[', ']')];
    pairs.sort_by_key(|(open, _)| trimmed.find(*open).unwrap_or(usize::MAX));
    for (open, close) in pairs {
        if let Some(candidate) = delimited(trimmed, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Ok(value);
            }
        }
    }

    Err(StudioError::Parse(format!(
        "reply is not JSON: {}",
        preview(trimmed, 200)
    )))
}

/// Parse a JSON reply straight into `T`
pub fn parse_reply_as<T: DeserializeOwned>(reply: &str) -> Result<T, StudioError> {
    let value = parse_json_reply(reply)?;
    serde_json::from_value(value).map_err(|e| StudioError::Parse(e.to_string()))
}

/// Clean up a plain-text reply: fences, surrounding quotes, labels
pub fn clean_text_reply(reply: &str) -> String {
    let mut text = reply.trim();

    if let Some(inner) = FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        text = inner.as_str().trim();
    }

    for label in ["Optimized prompt:", "Prompt:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim();
        }
    }

    let quoted = [('"', '"'), ('\'', '\''), ('“', '”')];
    for (open, close) in quoted {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
            break;
        }
    }

    text.to_string()
}

fn delimited(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_wrapped_in_prose_keeps_the_array() {
        let reply = "Here are the characters: [{\"name\": \"Ava\"}]";
        assert_eq!(parse_json_reply(reply).unwrap(), json!([{"name": "Ava"}]));

        let reply = "Result: {\"shots\": [1, 2]} hope that helps";
        assert_eq!(parse_json_reply(reply).unwrap(), json!({"shots": [1, 2]}));
    }

    #[test]
    fn test_fenced_and_bare_replies_agree() {
        let bare = r#"{"title":"Night Market","shots":[{"content":"lanterns"}]}"#;
        let fenced = format!("Here is your storyboard:\n```json\n{}\n```\nEnjoy!", bare);

        assert_eq!(parse_json_reply(bare).unwrap(), parse_json_reply(&fenced).unwrap());
    }

    #[test]
    fn test_brace_substring_fallback() {
        let reply = r#"Sure! {"title": "Dune Sea", "synopsis": "sand"} Let me know."#;
        assert_eq!(
            parse_json_reply(reply).unwrap(),
            json!({"title": "Dune Sea", "synopsis": "sand"})
        );
    }

    #[test]
    fn test_array_reply() {
        let reply = "Characters:\n[{\"name\": \"Ava\"}, {\"name\": \"Bo\"}]";
        assert_eq!(parse_json_reply(reply).unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unparseable_reply() {
        let err = parse_json_reply("I cannot help with that.").unwrap_err();
        assert!(matches!(err, StudioError::Parse(_)));
    }

    #[test]
    fn test_clean_text_reply() {
        assert_eq!(clean_text_reply("\"a misty forest, volumetric light\""), "a misty forest, volumetric light");
        assert_eq!(clean_text_reply("```\nOptimized prompt: red fox\n```"), "red fox");
        assert_eq!(clean_text_reply("  plain  "), "plain");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("风景画很美", 2), "风景...");
        assert_eq!(preview("short", 10), "short");
    }
}
