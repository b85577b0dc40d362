//! The dispatch context: one object owning every piece of mutable runtime state.
//!
//! Build it once at process start and share it (`Arc<DispatchContext>`) with every
//! call site. Tests build isolated contexts with their own keys, backend and cache.

use crate::cache::DualCache;
use crate::config::DispatchConfig;
use crate::dispatch::{Completion, Dispatcher, ModelListing};
use crate::keys::{KeyPool, KeySelector, KeySnapshot};
use crate::tasks::Task;
use crate::transport::{ChatBackend, HttpTransport};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct DispatchContext {
    config: Arc<DispatchConfig>,
    pool: Arc<KeyPool>,
    dispatcher: Dispatcher,
    cache: DualCache,
}

impl DispatchContext {
    /// Validate `config`, build the HTTP transport and connect the cache.
    ///
    /// Keys are materialized lazily on first use; a configuration without any key
    /// surfaces as an error from the first call, not from here.
    pub async fn from_config(config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn ChatBackend> = Arc::new(HttpTransport::new(&config.http)?);
        let cache = DualCache::connect(&config.cache).await;
        Self::with_parts(config, backend, cache)
    }

    pub async fn from_env() -> Result<Self> {
        Self::from_config(DispatchConfig::from_env()?).await
    }

    /// Assemble from explicit parts (custom backends, pre-built caches).
    pub fn with_parts(
        config: DispatchConfig,
        backend: Arc<dyn ChatBackend>,
        cache: DualCache,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pool = Arc::new(KeyPool::new(Arc::clone(&config)));
        let selector = Arc::new(KeySelector::new(Arc::clone(&pool)));
        let dispatcher = Dispatcher::from_config(&config, selector, backend);
        Ok(Self {
            config,
            pool,
            dispatcher,
            cache,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn cache(&self) -> &DualCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Uncached call straight through the dispatcher.
    pub async fn dispatch(
        &self,
        template: &str,
        text: &str,
        model: &str,
        want_json: bool,
    ) -> Result<Completion> {
        self.dispatcher.call(template, text, model, want_json).await
    }

    /// Run a built-in task through the cache. `model` defaults to the configured one.
    pub async fn run_task(&self, task: Task, text: &str, model: Option<&str>) -> Result<Completion> {
        let model = model.unwrap_or(&self.config.default_model);
        let payload = json!({
            "kind": "task",
            "task": task.name(),
            "text": text,
            "model": model,
            "json": task.wants_json(),
        });
        self.cached(payload, task.template(), text, model, task.wants_json())
            .await
    }

    /// Run a caller-supplied template in text mode, through the cache.
    pub async fn run_prompt(&self, template: &str, text: &str, model: Option<&str>) -> Result<Completion> {
        let model = model.unwrap_or(&self.config.default_model);
        let payload = json!({
            "kind": "prompt",
            "template": template,
            "text": text,
            "model": model,
            "json": false,
        });
        self.cached(payload, template, text, model, false).await
    }

    async fn cached(
        &self,
        payload: Value,
        template: &str,
        text: &str,
        model: &str,
        want_json: bool,
    ) -> Result<Completion> {
        if let Some(hit) = self.cache.get_as::<Completion>(&payload).await {
            debug!(request_id = %hit.meta.request_id, model, "served from cache");
            return Ok(hit);
        }

        let completion = self.dispatch(template, text, model, want_json).await?;
        // failures are never cached; the next call retries against the provider
        if completion.is_success() {
            self.cache.set_as(&payload, &completion).await?;
        }
        Ok(completion)
    }

    pub async fn list_models(&self) -> Result<ModelListing> {
        self.dispatcher.list_models().await
    }

    pub fn key_snapshots(&self) -> Result<Vec<KeySnapshot>> {
        self.pool.snapshots()
    }
}
