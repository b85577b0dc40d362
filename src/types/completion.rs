//! Chat-completion request/response bodies and token usage.
//!
//! Providers disagree on how (and whether) they report usage. The response keeps the
//! `usage` member as a [`UsageReport`] and [`TokenUsage::from_report`] is the only
//! place that interprets it.

use super::message::Message;
use serde::{Deserialize, Deserializer, Serialize};

/// Sampling temperature for every call that accepts one.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<UsageReport>,
}

impl ChatCompletion {
    /// Content of the first choice; `None` when the provider returned no choices.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|c| c.message.content.as_deref().unwrap_or(""))
    }

    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage::from_report(self.usage.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// The `usage` member as the provider sent it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UsageReport {
    /// An object; every count is optional and may arrive as a number or numeric string.
    Counts(UsageCounts),
    /// Anything else (`null`, a bare number, a provider-specific shape).
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UsageCounts {
    #[serde(default, deserialize_with = "lenient_count")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub completion_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_tokens: Option<u64>,
}

fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| match v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Token counts extracted from a response, each optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn from_report(report: Option<&UsageReport>) -> Self {
        match report {
            Some(UsageReport::Counts(c)) => Self {
                prompt_tokens: c.prompt_tokens,
                completion_tokens: c.completion_tokens,
                total_tokens: c.total_tokens,
            },
            _ => Self::default(),
        }
    }

    /// Tokens to charge against the key's TPM window.
    ///
    /// Prefers the reported total, then the sum of the parts; `None` when nothing
    /// was reported.
    pub fn billable(&self) -> Option<u64> {
        self.total_tokens.or(match (self.prompt_tokens, self.completion_tokens) {
            (None, None) => None,
            (p, c) => Some(p.unwrap_or(0).saturating_add(c.unwrap_or(0))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_absent_temperature() {
        let req = ChatCompletionRequest::new("o1", vec![Message::system("s"), Message::user("u")]);
        let body = serde_json::to_value(&req).unwrap();
        assert!(body.get("temperature").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "u");

        let body = serde_json::to_value(req.with_temperature(Some(DEFAULT_TEMPERATURE))).unwrap();
        assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_usage_counts() {
        let resp: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": "5", "total_tokens": 15}
        }))
        .unwrap();
        assert_eq!(resp.first_content(), Some("hi"));
        let usage = resp.token_usage();
        assert_eq!(usage.completion_tokens, Some(5));
        assert_eq!(usage.billable(), Some(15));
    }

    #[test]
    fn test_missing_or_odd_usage_does_not_fail_parsing() {
        let resp: ChatCompletion = serde_json::from_value(json!({
            "choices": [{"message": {"content": null}}]
        }))
        .unwrap();
        assert_eq!(resp.first_content(), Some(""));
        assert_eq!(resp.token_usage(), TokenUsage::default());
        assert_eq!(resp.token_usage().billable(), None);

        let resp: ChatCompletion = serde_json::from_value(json!({
            "choices": [],
            "usage": "n/a"
        }))
        .unwrap();
        assert!(resp.first_content().is_none());
        assert!(matches!(resp.usage, Some(UsageReport::Unrecognized(_))));
    }

    #[test]
    fn test_billable_falls_back_to_parts() {
        let usage = TokenUsage {
            prompt_tokens: Some(7),
            completion_tokens: None,
            total_tokens: None,
        };
        assert_eq!(usage.billable(), Some(7));
    }

    #[test]
    fn test_billable_saturates_on_absurd_counts() {
        let usage = TokenUsage {
            prompt_tokens: Some(u64::MAX),
            completion_tokens: Some(u64::MAX),
            total_tokens: None,
        };
        assert_eq!(usage.billable(), Some(u64::MAX));
    }
}
