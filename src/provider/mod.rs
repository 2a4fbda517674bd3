//! Generative-text provider trait: the boundary to the model backend
//!
//! Agents never reach for a global provider. The runtime builds one provider
//! at startup and hands an `Arc<dyn Provider>` to every instance it creates.

use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod ollama;

pub use ollama::OllamaProvider;

/// Free-form generation options (temperature, max_tokens, backend extras)
pub type GenerateOptions = serde_json::Map<String, serde_json::Value>;

/// Lazy, finite, non-restartable stream of partial text chunks
pub type TextStream = BoxStream<'static, Result<String>>;

/// A completed generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// Provider-assigned response id
    pub id: String,

    /// Model that produced the text
    pub model: String,

    /// Generated text
    pub text: String,

    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Core trait for generative-text backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate a full response for `prompt`
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerateOptions,
    ) -> Result<Completion>;

    /// Stream a response as text chunks
    ///
    /// The stream ends when the backend signals end-of-stream. Malformed
    /// frames are skipped rather than surfaced as errors.
    async fn stream_generate(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream>;

    /// Provider name (e.g., "ollama")
    fn name(&self) -> &str;
}

/// Build the provider named by `config.kind`
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.kind.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => Err(AgentError::Config(format!("Unknown provider: {}", other))),
    }
}
