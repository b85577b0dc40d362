//! Provider transport.
//!
//! [`ChatBackend`] is the seam between the dispatcher and the network: the
//! production implementation is [`HttpTransport`], tests substitute scripted fakes.

pub mod http;

pub use http::{HttpTransport, TransportError};

use crate::keys::KeyState;
use crate::types::{ChatCompletion, ChatCompletionRequest};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Issue one chat-completion request with `key`'s credential and endpoint.
    async fn chat_completion(
        &self,
        key: &KeyState,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletion>;

    /// Model ids visible to `key`.
    async fn list_models(&self, key: &KeyState) -> Result<Vec<String>>;

    fn name(&self) -> &'static str;
}
