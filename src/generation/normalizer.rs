//! Image artifact extraction from provider responses
//!
//! Providers answer image requests in incompatible shapes: raw image bytes, a
//! bare URL, `{status, results: [{url}]}` envelopes, SSE-style streams of
//! `data: {...}` snapshots, nested `{data: {image}}` objects, or text with a
//! URL buried in it. [`extract_image_artifact`] tries a fixed sequence of
//! strategies and returns the first hit as a URL or `data:` URI.
//!
//! Strategy order is fixed rather than "best match": an earlier strategy
//! always wins over a later one.

use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::StudioError;
use super::reply::preview;

/// Field names providers conventionally put image references under, in lookup order
pub const IMAGE_KEYS: &[&str] = &[
    "url", "image", "image_url", "img_url", "picture", "photo",
    "b64_json", "base64", "data", "result", "response",
];

/// Keys whose string values may be raw base64 image data
const BASE64_KEYS: &[&str] = &["b64_json", "base64", "image", "picture", "photo"];

const RESULT_KEYS: &[&str] = &["results", "result"];
const RESULT_URL_KEYS: &[&str] = &["url", "image", "image_url"];

const FAILED_STATUSES: &[&str] = &["failed", "error", "failure", "fail"];
const SUCCEEDED_STATUSES: &[&str] = &["succeeded", "success", "completed", "done"];
const RUNNING_STATUSES: &[&str] = &["running", "queued", "pending", "processing", "in_progress", "submitted"];

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>`\\\]})]+"#).expect("url pattern is valid")
});

static DATA_URI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+").expect("data uri pattern is valid")
});

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".bmp"];
const IMAGE_PATH_HINTS: &[&str] = &["/image", "/img", "/images/", "/picture", "/photo", "/file"];

/// 从任意提供商响应中提取图片引用（URL 或 data URI）
///
/// ## 策略顺序
/// 1. `image/*` 内容类型（或带图片签名的 octet-stream）→ 包装为 data URI
/// 2. 以 `http` / `data:image` 开头的裸字符串 → 原样返回
/// 3. SSE 风格 `data: {...}` 流 → 以最后一个可解析的快照为准
/// 4. JSON → 先检查 `status` 信封，再做深度优先的结构搜索
/// 5. 对原始文本做正则扫描
///
/// ## 返回值
/// - `Err(GenerationFailed)`: 提供商明确报告失败
/// - `Err(GenerationStillRunning)`: 只拿到了进行中的快照
/// - `Err(MalformedResponse)`: 所有策略都没有找到图片引用
pub fn extract_image_artifact(body: &[u8], content_type: Option<&str>) -> Result<String, StudioError> {
    if let Some(mime) = binary_image_mime(body, content_type) {
        tracing::debug!(mime = %mime, bytes = body.len(), "Wrapping binary image response");
        return Ok(data_uri(&mime, body));
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Err(StudioError::malformed("empty response body"));
    }

    if let Some(reference) = bare_reference(text) {
        return Ok(reference);
    }

    let is_stream = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("event-stream"))
        || text.lines().any(|line| line.trim_start().starts_with("data:"));
    if is_stream {
        if let Some(outcome) = extract_from_event_stream(text) {
            return outcome;
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(found) = extract_from_value(&value)? {
            return Ok(found);
        }
        if let Some(reason) = error_message(&value) {
            return Err(StudioError::GenerationFailed(reason));
        }
    }

    scan_text(text).ok_or_else(|| {
        StudioError::malformed(format!("no image reference found in response: {}", preview(text, 300)))
    })
}

/// Search an already-parsed JSON value: status envelope first, then structure
pub fn extract_from_value(value: &Value) -> Result<Option<String>, StudioError> {
    if let Some(envelope) = status_envelope(value) {
        let status = envelope
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if FAILED_STATUSES.contains(&status.as_str()) {
            return Err(StudioError::GenerationFailed(failure_reason(envelope)));
        }

        if SUCCEEDED_STATUSES.contains(&status.as_str()) {
            let narrowed = RESULT_KEYS
                .iter()
                .filter_map(|key| envelope.get(*key))
                .find_map(result_reference);
            if narrowed.is_some() {
                return Ok(narrowed);
            }
        }

        if RUNNING_STATUSES.contains(&status.as_str()) && !has_results(envelope) {
            let progress = envelope
                .get("progress")
                .map(|p| format!(" ({}%)", p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string())))
                .unwrap_or_default();
            return Err(StudioError::GenerationStillRunning(format!(
                "provider returned a '{}' snapshot without results{}",
                status, progress
            )));
        }
    }

    Ok(find_image_reference(value))
}

/// Depth-first search for an image reference
///
/// Within an object, conventional keys holding usable strings win first,
/// then conventional keys holding containers, then every other entry in
/// document order.
pub fn find_image_reference(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => loose_reference(s),
        Value::Array(items) => items.iter().find_map(find_image_reference),
        Value::Object(map) => find_in_object(map),
        _ => None,
    }
}

fn find_in_object(map: &Map<String, Value>) -> Option<String> {
    for key in IMAGE_KEYS {
        if let Some(Value::String(s)) = map.get(*key) {
            if let Some(found) = named_reference(key, s) {
                return Some(found);
            }
        }
    }

    for key in IMAGE_KEYS {
        if let Some(nested @ (Value::Object(_) | Value::Array(_))) = map.get(*key) {
            if let Some(found) = find_image_reference(nested) {
                return Some(found);
            }
        }
    }

    map.iter()
        .filter(|(key, _)| !IMAGE_KEYS.contains(&key.as_str()))
        .find_map(|(_, nested)| find_image_reference(nested))
}

/// Search inside the `results`/`result` of a succeeded envelope
///
/// The envelope already vouches for these values, so any single-token string
/// under `url`/`image`/`image_url` is taken once the strict search comes up empty.
fn result_reference(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => loose_reference(s).or_else(|| plain_token(s)),
        Value::Array(items) => items.iter().find_map(result_reference),
        Value::Object(map) => find_in_object(map).or_else(|| {
            RESULT_URL_KEYS
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_str))
                .find_map(plain_token)
        }),
        _ => None,
    }
}

fn plain_token(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty() && !trimmed.chars().any(char::is_whitespace)).then(|| trimmed.to_string())
}

/// Status-bearing object: the value itself, or a `data` wrapper around it
fn status_envelope(value: &Value) -> Option<&Value> {
    if value.get("status").is_some_and(Value::is_string) {
        return Some(value);
    }
    value
        .get("data")
        .filter(|data| data.get("status").is_some_and(Value::is_string))
}

fn has_results(envelope: &Value) -> bool {
    RESULT_KEYS.iter().filter_map(|key| envelope.get(*key)).any(|v| match v {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

pub(crate) fn failure_reason(envelope: &Value) -> String {
    ["failure_reason", "error", "message", "msg", "reason"]
        .iter()
        .filter_map(|key| envelope.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| "provider reported failure without a reason".to_string())
}

/// `{"error": ...}` bodies that carry no artifact
fn error_message(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(obj.clone()).to_string())),
        _ => None,
    }
}

/// Strings accepted anywhere in the structure
fn loose_reference(s: &str) -> Option<String> {
    let trimmed = s.trim();
    let lowered = trimmed.get(..11).unwrap_or(trimmed).to_ascii_lowercase();
    (lowered.starts_with("http://") || lowered.starts_with("https://") || lowered.starts_with("data:image"))
        .then(|| trimmed.to_string())
}

/// Strings under a conventional key: references, base64 payloads, or embedded JSON
fn named_reference(key: &str, s: &str) -> Option<String> {
    if let Some(found) = loose_reference(s) {
        return Some(found);
    }

    let trimmed = s.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str::<Value>(trimmed)
            .ok()
            .and_then(|nested| find_image_reference(&nested));
    }

    let min_len = if matches!(key, "b64_json" | "base64") { 4 } else { 64 };
    if BASE64_KEYS.contains(&key) && trimmed.len() >= min_len {
        if let Ok(bytes) = BASE64.decode(trimmed.as_bytes()) {
            let mime = sniff_image_mime(&bytes).unwrap_or("image/png");
            return Some(format!("data:{};base64,{}", mime, trimmed));
        }
    }

    None
}

/// Returns `Some(outcome)` when a stream snapshot was parsed and is authoritative
fn extract_from_event_stream(text: &str) -> Option<Result<String, StudioError>> {
    let mut last: Option<(Value, &str)> = None;

    for line in text.lines() {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => last = Some((value, payload)),
            Err(e) => tracing::debug!(error = %e, line = %preview(payload, 80), "Skipping unparseable stream line"),
        }
    }

    let (value, raw_line) = last?;
    Some(match extract_from_value(&value) {
        Ok(Some(found)) => Ok(found),
        Ok(None) => scan_text(raw_line).ok_or_else(|| {
            StudioError::malformed(format!(
                "final stream snapshot holds no image reference: {}",
                preview(raw_line, 300)
            ))
        }),
        Err(e) => Err(e),
    })
}

/// Bare URL or data URI, possibly as a JSON string literal
///
/// Line-wrapped base64 inside a data URI is joined back together.
fn bare_reference(text: &str) -> Option<String> {
    let unquoted;
    let candidate = if text.starts_with('"') {
        unquoted = serde_json::from_str::<String>(text).ok()?;
        unquoted.trim()
    } else {
        text
    };

    let joined;
    let candidate = if candidate.starts_with("data:image") && candidate.contains(";base64,") {
        joined = candidate.split_whitespace().collect::<String>();
        joined.as_str()
    } else {
        candidate
    };

    if candidate.chars().any(char::is_whitespace) {
        return None;
    }
    (candidate.starts_with("http") || candidate.starts_with("data:image")).then(|| candidate.to_string())
}

/// Last resort: regex over the raw text, preferring image-looking matches
pub fn scan_text(text: &str) -> Option<String> {
    let text = text.replace("\\/", "/").replace("\\u0026", "&");

    let mut matches: Vec<(usize, String, bool)> = DATA_URI_PATTERN
        .find_iter(&text)
        .map(|m| (m.start(), m.as_str().to_string(), true))
        .collect();

    for m in URL_PATTERN.find_iter(&text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if url.len() > "https://".len() {
            matches.push((m.start(), url.to_string(), looks_like_image_url(url)));
        }
    }

    matches.sort_by_key(|(start, _, _)| *start);

    matches
        .iter()
        .find(|(_, _, image_like)| *image_like)
        .or_else(|| matches.first())
        .map(|(_, found, _)| found.clone())
}

fn looks_like_image_url(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    let path = lowered.split(['?', '#']).next().unwrap_or(&lowered);
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || IMAGE_PATH_HINTS.iter().any(|hint| path.contains(hint))
}

fn binary_image_mime(body: &[u8], content_type: Option<&str>) -> Option<String> {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if declared.starts_with("image/") {
        return Some(declared);
    }

    if declared.is_empty() || declared.ends_with("octet-stream") {
        return sniff_image_mime(body).map(str::to_string);
    }

    None
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(body: &str) -> Result<String, StudioError> {
        extract_image_artifact(body.as_bytes(), Some("application/json"))
    }

    #[test]
    fn test_binary_image_is_wrapped() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        let uri = extract_image_artifact(png, Some("image/png")).unwrap();
        assert_eq!(uri, format!("data:image/png;base64,{}", BASE64.encode(png)));

        // undeclared bytes are sniffed
        let uri = extract_image_artifact(png, Some("application/octet-stream")).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_bare_string_wins_over_everything() {
        assert_eq!(extract("data:image/png;base64,AAAA").unwrap(), "data:image/png;base64,AAAA");
        assert_eq!(
            extract("https://cdn.example.com/out/1.png").unwrap(),
            "https://cdn.example.com/out/1.png"
        );
        // a JSON string literal is still a bare string
        assert_eq!(extract(r#""data:image/png;base64,AAAA""#).unwrap(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_sse_last_valid_line_wins() {
        let body = concat!(
            "data: {\"status\":\"running\",\"progress\":10}\n\n",
            "data: {not json at all\n\n",
            "data: {\"status\":\"succeeded\",\"results\":[{\"url\":\"X\"}]}\n\n",
        );
        assert_eq!(
            extract_image_artifact(body.as_bytes(), Some("text/event-stream")).unwrap(),
            "X"
        );
    }

    #[test]
    fn test_succeeded_results_accept_opaque_references() {
        let body = json!({"data": {"status": "succeeded", "results": [{"image": "file-42"}]}});
        assert_eq!(extract(&body.to_string()).unwrap(), "file-42");

        // a real URL under another key still beats an opaque token
        let body = json!({"status": "success", "result": {"url": "X", "image_url": "https://cdn.example.com/r.png"}});
        assert_eq!(extract(&body.to_string()).unwrap(), "https://cdn.example.com/r.png");

        // outside a succeeded envelope the strict rules stay
        assert!(extract(r#"{"results": [{"url": "X"}]}"#).is_err());
    }

    #[test]
    fn test_line_wrapped_data_uri_is_joined() {
        let body = "data:image/png;base64,iVBORw0K\nGgoAAAAN\r\nSUhEUgAA\n";
        assert_eq!(extract(body).unwrap(), "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAA");

        let quoted = "\"data:image/png;base64,iVBORw0K\\nGgoAAAAN\"";
        assert_eq!(extract(quoted).unwrap(), "data:image/png;base64,iVBORw0KGgoAAAAN");
    }

    #[test]
    fn test_sse_running_snapshot_is_still_running() {
        let body = "data: {\"status\":\"running\",\"progress\":40,\"results\":[]}\n\n";
        let err = extract(body).unwrap_err();
        assert!(matches!(err, StudioError::GenerationStillRunning(_)));
    }

    #[test]
    fn test_sse_ignores_urls_from_superseded_lines() {
        let body = concat!(
            "data: {\"status\":\"running\",\"preview\":\"https://old.example.com/p.png\"}\n",
            "data: {\"status\":\"succeeded\",\"results\":[{\"url\":\"https://new.example.com/final.png\"}]}\n",
        );
        assert_eq!(extract(body).unwrap(), "https://new.example.com/final.png");
    }

    #[test]
    fn test_failed_status_raises_with_reason() {
        let err = extract(r#"{"code":0,"data":{"status":"failed","failure_reason":"content policy"}}"#).unwrap_err();
        match err {
            StudioError::GenerationFailed(reason) => assert_eq!(reason, "content policy"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_succeeded_narrows_to_results() {
        let body = json!({
            "status": "succeeded",
            "thumbnail": "https://cdn.example.com/thumb.png",
            "results": [{"url": "https://cdn.example.com/full.png"}]
        });
        assert_eq!(extract(&body.to_string()).unwrap(), "https://cdn.example.com/full.png");
    }

    #[test]
    fn test_openai_style_b64_json() {
        let body = json!({"created": 1, "data": [{"b64_json": "iVBORw0KGgo="}]});
        assert_eq!(extract(&body.to_string()).unwrap(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[test]
    fn test_named_keys_beat_document_order() {
        let body = json!({
            "meta": {"source": "https://cdn.example.com/source.png"},
            "data": {"image": "https://cdn.example.com/result.png"}
        });
        assert_eq!(extract(&body.to_string()).unwrap(), "https://cdn.example.com/result.png");
    }

    #[test]
    fn test_deep_unnamed_search() {
        let body = json!({"payload": {"items": [{"href": "https://cdn.example.com/deep.webp"}]}});
        assert_eq!(extract(&body.to_string()).unwrap(), "https://cdn.example.com/deep.webp");
    }

    #[test]
    fn test_embedded_json_string() {
        let body = json!({"response": "{\"image_url\": \"https://cdn.example.com/nested.jpg\"}"});
        assert_eq!(extract(&body.to_string()).unwrap(), "https://cdn.example.com/nested.jpg");
    }

    #[test]
    fn test_regex_scan_prefers_image_urls() {
        let body = r#"Done! See https://docs.example.com/help or grab ![img](https:\/\/cdn.example.com\/a\/b.png) now"#;
        assert_eq!(extract(body).unwrap(), "https://cdn.example.com/a/b.png");

        let body = "result => https://cdn.example.com/download?id=7, enjoy";
        assert_eq!(extract(body).unwrap(), "https://cdn.example.com/download?id=7");
    }

    #[test]
    fn test_error_envelope_is_generation_failure() {
        let err = extract(r#"{"error":{"message":"quota exceeded","type":"insufficient_quota"}}"#).unwrap_err();
        assert!(matches!(err, StudioError::GenerationFailed(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn test_nothing_found_is_malformed() {
        assert!(matches!(extract(r#"{"ok": true}"#), Err(StudioError::MalformedResponse(_))));
        assert!(matches!(extract("   "), Err(StudioError::MalformedResponse(_))));
    }

    #[test]
    fn test_plain_text_field_is_not_an_image() {
        // "data": "ok" must not be mistaken for an artifact
        assert!(extract(r#"{"data": "ok", "result": "queued for review"}"#).is_err());
    }
}
