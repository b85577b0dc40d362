use super::ChatBackend;
use crate::config::HttpConfig;
use crate::dispatch::classify::ErrorClass;
use crate::keys::KeyState;
use crate::types::{ChatCompletion, ChatCompletionRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Proxy;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::info;

/// reqwest-based transport for OpenAI-compatible endpoints.
///
/// One pooled client is shared by every key; the credential and base URL come from
/// the [`KeyState`] passed to each call.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("AI_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    fn url(key: &KeyState, path: &str) -> String {
        format!("{}{}", key.base_url().trim_end_matches('/'), path)
    }

    async fn read_success_body(
        &self,
        key: &KeyState,
        endpoint: &str,
        resp: reqwest::Response,
        start: std::time::Instant,
    ) -> Result<String> {
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(TransportError::from_reqwest)?;
        if (200..300).contains(&status) {
            return Ok(body);
        }

        let class = ErrorClass::from_http_status(status);
        info!(
            http_status = status,
            error_class = class.as_str(),
            key_index = key.index(),
            provider = key.provider().as_str(),
            endpoint,
            duration_ms = start.elapsed().as_millis() as u64,
            "provider request failed"
        );
        Err(Error::Remote {
            status,
            class,
            message: provider_error_message(&body),
            retryable: class.is_retryable(),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpTransport {
    async fn chat_completion(
        &self,
        key: &KeyState,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletion> {
        let start = std::time::Instant::now();
        let resp = self
            .client
            .post(Self::url(key, "/chat/completions"))
            .bearer_auth(key.api_key())
            .json(request)
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let body = self
            .read_success_body(key, "/chat/completions", resp, start)
            .await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Transport(TransportError::Decode(e.to_string())))
    }

    async fn list_models(&self, key: &KeyState) -> Result<Vec<String>> {
        let start = std::time::Instant::now();
        let resp = self
            .client
            .get(Self::url(key, "/models"))
            .bearer_auth(key.api_key())
            .send()
            .await
            .map_err(TransportError::from_reqwest)?;

        let body = self.read_success_body(key, "/models", resp, start).await?;
        let listing: ModelList = serde_json::from_str(&body)
            .map_err(|e| Error::Transport(TransportError::Decode(e.to_string())))?;
        Ok(listing
            .data
            .into_iter()
            .filter_map(|m| m.id)
            .filter(|id| !id.is_empty())
            .collect())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: Option<String>,
}

/// Prefer the OpenAI-style `error.message`, fall back to the raw body.
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .or_else(|| json.get("message").and_then(|m| m.as_str()))
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("undecodable provider response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    fn from_reqwest(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Transport(TransportError::Timeout(e.to_string()))
        } else {
            Error::Transport(TransportError::Http(e))
        }
    }
}
