//! Dispatcher results: content, outcome and per-call metadata.

use crate::keys::Provider;
use crate::types::TokenUsage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Marker in prompt templates replaced by the caller's text.
pub const PROMPT_PLACEHOLDER: &str = "{{#sys.query#}}";

pub const PARSE_FAILURE_MESSAGE: &str = "Failed to parse model output as JSON.";

/// Prefix of text-mode results for calls that exhausted their attempts.
pub const TEXT_ERROR_PREFIX: &str = "API Error: ";

static FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```\s*$")
        .unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

static OPEN_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n?")
        .unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

/// Substitute `text` for every placeholder in `template`.
pub fn render_prompt(template: &str, text: &str) -> String {
    template.replace(PROMPT_PLACEHOLDER, text)
}

/// Remove a Markdown code fence (```` ```json ```` or bare ```` ``` ````) around `raw`.
///
/// Text without a leading fence is returned trimmed but otherwise untouched. An opening
/// fence whose closing fence is missing (truncated output) is still stripped.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    if let Some(inner) = FENCED.captures(trimmed).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    match OPEN_FENCE.find(trimmed) {
        Some(open) => trimmed[open.end()..].trim(),
        None => trimmed,
    }
}

/// Fence-strip and parse model output as JSON.
pub fn parse_json_output(raw: &str) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fence(raw))
}

/// What a call produced for its caller.
///
/// Serialized adjacently tagged so a text result and a JSON string stay distinct
/// through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Content {
    Json(Value),
    Text(String),
}

impl Content {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Content::Json(v) => Some(v),
            Content::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Json(_) => None,
        }
    }

    /// The `error` member of a structured error result, if this is one.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Content::Json(v) => v.get("error").and_then(Value::as_str),
            Content::Text(s) => s.strip_prefix(TEXT_ERROR_PREFIX),
        }
    }

    /// Render for display: JSON pretty-printed, text as-is.
    pub fn to_display_string(&self) -> String {
        match self {
            Content::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
            Content::Text(s) => s.clone(),
        }
    }

    pub(crate) fn parse_failure(raw: &str) -> Self {
        Content::Json(json!({
            "error": PARSE_FAILURE_MESSAGE,
            "raw_output": raw,
        }))
    }

    pub(crate) fn error(message: &str, want_json: bool) -> Self {
        if want_json {
            Content::Json(json!({ "error": message }))
        } else {
            Content::Text(format!("{TEXT_ERROR_PREFIX}{message}"))
        }
    }
}

/// Terminal state of a dispatcher call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// No attempt produced a response.
    Exhausted,
    /// JSON mode and the model output did not parse.
    ParseFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Exhausted => "exhausted",
            Outcome::ParseFailure => "parse_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Metadata for downstream logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMeta {
    pub request_id: String,
    pub system_prompt: String,
    pub model: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    /// Key that served the last attempt.
    pub key_index: Option<usize>,
    pub provider: Option<Provider>,
    pub attempts: u32,
}

impl CallMeta {
    pub(crate) fn new(request_id: String, system_prompt: String, model: String) -> Self {
        Self {
            request_id,
            system_prompt,
            model,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            key_index: None,
            provider: None,
            attempts: 0,
        }
    }

    pub(crate) fn set_usage(&mut self, usage: TokenUsage) {
        self.prompt_tokens = usage.prompt_tokens;
        self.completion_tokens = usage.completion_tokens;
        self.total_tokens = usage.total_tokens;
    }
}

/// Result of [`crate::dispatch::Dispatcher::call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Content,
    pub meta: CallMeta,
    pub outcome: Outcome,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prompt_replaces_every_placeholder() {
        let out = render_prompt("A {{#sys.query#}} B {{#sys.query#}}", "x");
        assert_eq!(out, "A x B x");
        assert_eq!(render_prompt("no marker", "x"), "no marker");
    }

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```\n"), "[1, 2]");
        assert_eq!(strip_code_fence("```json {\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_strip_unterminated_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_json_output() {
        let v = parse_json_output("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(v, json!({"a": 1}));
        assert!(parse_json_output("Sure! Here is the JSON you asked for").is_err());
    }

    #[test]
    fn test_error_content_shapes() {
        let json_err = Content::error("boom", true);
        assert_eq!(json_err, Content::Json(json!({"error": "boom"})));
        assert_eq!(json_err.error_message(), Some("boom"));

        let text_err = Content::error("boom", false);
        assert_eq!(text_err, Content::Text("API Error: boom".into()));
        assert_eq!(text_err.error_message(), Some("boom"));

        let parse = Content::parse_failure("not json");
        assert_eq!(parse.as_json().unwrap()["raw_output"], "not json");
        assert_eq!(parse.error_message(), Some(PARSE_FAILURE_MESSAGE));
    }

    #[test]
    fn test_content_keeps_text_and_json_strings_apart() {
        let text = serde_json::to_value(Content::Text("hi".into())).unwrap();
        assert_eq!(text, json!({"kind": "text", "value": "hi"}));
        let back: Content = serde_json::from_value(text).unwrap();
        assert_eq!(back, Content::Text("hi".into()));

        let json_str = serde_json::to_value(Content::Json(json!("hi"))).unwrap();
        let back: Content = serde_json::from_value(json_str).unwrap();
        assert_eq!(back, Content::Json(json!("hi")));
    }
}
