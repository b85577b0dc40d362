//! 调度模块：选取密钥、发起补全请求、分类失败并带退避重试。
//!
//! # Dispatch Module
//!
//! Per attempt a call moves through
//! `SELECT_KEY → ISSUE_REQUEST → { SUCCESS | TRANSIENT_FAILURE → BACKOFF → SELECT_KEY | PARSE_FAILURE }`.
//! Every provider failure, whatever its status, is charged to the serving key and
//! retried on a freshly selected key. Unparseable JSON output is not retried but
//! still counts against the key that produced it. Provider failures never escape
//! [`Dispatcher::call`]; they come back as a [`Completion`] whose [`Outcome`] says
//! what happened.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`classify`] | HTTP status → [`ErrorClass`] and retryability |
//! | [`retry`] | Attempt budget and exponential backoff |
//! | [`output`] | Prompt rendering, fence stripping, result types |

pub mod classify;
pub mod output;
pub mod retry;

pub use classify::ErrorClass;
pub use output::{
    parse_json_output, render_prompt, strip_code_fence, CallMeta, Completion, Content, Outcome,
    PARSE_FAILURE_MESSAGE, PROMPT_PLACEHOLDER, TEXT_ERROR_PREFIX,
};
pub use retry::RetryPolicy;

use crate::config::DispatchConfig;
use crate::keys::{is_temperature_restricted, KeySelector, KeyState, Provider};
use crate::transport::{ChatBackend, TransportError};
use crate::types::{ChatCompletion, ChatCompletionRequest, Message, DEFAULT_TEMPERATURE};
use crate::{Error, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Models visible to one configured key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModels {
    pub provider: Provider,
    pub base_url: String,
    pub key_index: usize,
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelListing {
    pub providers: Vec<ProviderModels>,
    /// Sorted, de-duplicated union of every key's models.
    pub unique_models: Vec<String>,
}

/// Dispatcher / retry engine.
pub struct Dispatcher {
    selector: Arc<KeySelector>,
    backend: Arc<dyn ChatBackend>,
    retry: RetryPolicy,
    estimated_tokens: u64,
}

impl Dispatcher {
    pub fn new(
        selector: Arc<KeySelector>,
        backend: Arc<dyn ChatBackend>,
        retry: RetryPolicy,
        estimated_tokens: u64,
    ) -> Self {
        Self {
            selector,
            backend,
            retry,
            estimated_tokens,
        }
    }

    pub fn from_config(
        config: &DispatchConfig,
        selector: Arc<KeySelector>,
        backend: Arc<dyn ChatBackend>,
    ) -> Self {
        Self::new(
            selector,
            backend,
            RetryPolicy::from(&config.retry),
            config.estimated_tokens_per_call,
        )
    }

    pub fn selector(&self) -> &Arc<KeySelector> {
        &self.selector
    }

    /// Run `template` (with `text` substituted) against `model`.
    ///
    /// Only a configuration problem (no keys at all) is returned as `Err`; every
    /// provider-side failure is folded into the returned [`Completion`].
    pub async fn call(
        &self,
        template: &str,
        text: &str,
        model: &str,
        want_json: bool,
    ) -> Result<Completion> {
        let request_id = Uuid::new_v4().to_string();
        let system_prompt = render_prompt(template, text);
        let request = ChatCompletionRequest::new(
            model,
            vec![Message::system(system_prompt.as_str()), Message::user(text)],
        )
        .with_temperature(if is_temperature_restricted(model) {
            None
        } else {
            Some(DEFAULT_TEMPERATURE)
        });

        let mut meta = CallMeta::new(request_id, system_prompt, model.to_string());
        let started = Instant::now();
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.retry.max_attempts {
            let key = self.selector.select(model, self.estimated_tokens).await?;
            meta.attempts = attempt;
            meta.key_index = Some(key.index());
            meta.provider = Some(key.provider());

            match self.attempt(&key, &request).await {
                Ok(response) => {
                    let usage = response.token_usage();
                    key.record_usage(Instant::now(), usage.billable());
                    meta.set_usage(usage);

                    let raw = response.first_content().unwrap_or_default();
                    let (content, outcome) = if want_json {
                        match parse_json_output(raw) {
                            Ok(value) => (Content::Json(value), Outcome::Success),
                            Err(e) => {
                                warn!(
                                    request_id = %meta.request_id,
                                    model,
                                    key_index = key.index(),
                                    error = %e,
                                    raw_len = raw.len(),
                                    "model output is not valid JSON"
                                );
                                (Content::parse_failure(raw), Outcome::ParseFailure)
                            }
                        }
                    } else {
                        (Content::Text(raw.to_string()), Outcome::Success)
                    };
                    // Unparseable output accumulates toward the breaker threshold.
                    if outcome.is_success() {
                        key.mark_success();
                    } else {
                        key.mark_failure(Instant::now());
                    }
                    return Ok(self.finish(content, meta, outcome, started));
                }
                Err(e) => {
                    key.mark_failure(Instant::now());
                    warn!(
                        request_id = %meta.request_id,
                        model,
                        key_index = key.index(),
                        provider = key.provider().as_str(),
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "provider call failed"
                    );
                    let stop = self.retry.fail_fast && !e.is_transient();
                    last_error = Some(e.to_string());
                    if stop {
                        break;
                    }
                    if self.retry.has_attempts_left(attempt) {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "Unknown error".to_string());
        let content = Content::error(&message, want_json);
        Ok(self.finish(content, meta, Outcome::Exhausted, started))
    }

    async fn attempt(&self, key: &KeyState, request: &ChatCompletionRequest) -> Result<ChatCompletion> {
        let response = self.backend.chat_completion(key, request).await?;
        if response.choices.is_empty() {
            return Err(Error::Transport(TransportError::Decode(
                "response contained no choices".to_string(),
            )));
        }
        Ok(response)
    }

    fn finish(&self, content: Content, meta: CallMeta, outcome: Outcome, started: Instant) -> Completion {
        info!(
            request_id = %meta.request_id,
            model = %meta.model,
            outcome = outcome.as_str(),
            attempts = meta.attempts,
            key_index = ?meta.key_index,
            total_tokens = ?meta.total_tokens,
            backend = self.backend.name(),
            duration_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        Completion {
            content,
            meta,
            outcome,
        }
    }

    /// Enumerate the models visible to every configured key.
    ///
    /// Keys are queried concurrently; a failing key is reported inline with an
    /// `error` and an empty model list.
    pub async fn list_models(&self) -> Result<ModelListing> {
        let keys = self.selector.pool().keys()?;
        let backend = &self.backend;
        let providers: Vec<ProviderModels> = join_all(keys.iter().map(|key| async move {
            let (models, error) = match backend.list_models(key).await {
                Ok(models) => (models, None),
                Err(e) => {
                    warn!(
                        key_index = key.index(),
                        provider = key.provider().as_str(),
                        error = %e,
                        "model listing failed"
                    );
                    (Vec::new(), Some(e.to_string()))
                }
            };
            ProviderModels {
                provider: key.provider(),
                base_url: key.base_url().to_string(),
                key_index: key.index(),
                models,
                error,
            }
        }))
        .await;

        let unique_models = providers
            .iter()
            .flat_map(|p| p.models.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(ModelListing {
            providers,
            unique_models,
        })
    }
}
