//! Agent that answers `prompt` messages through the shared provider

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::instance::AgentInstance;
use crate::provider::GenerateOptions;
use crate::types::{message, Message};
use async_trait::async_trait;
use serde_json::json;

/// Forwards `{"prompt": "..."}` to the provider using the instance model
///
/// `temperature` and `max_tokens` from the instance config are passed
/// through as generation options.
#[derive(Debug, Default)]
pub struct CompletionAgent;

impl CompletionAgent {
    fn options(ctx: &AgentInstance) -> GenerateOptions {
        let mut options = GenerateOptions::new();
        for key in ["temperature", "max_tokens"] {
            if let Some(value) = ctx.config_value(key) {
                options.insert(key.to_string(), value);
            }
        }
        options
    }
}

#[async_trait]
impl Agent for CompletionAgent {
    async fn on_ready(&self, ctx: &AgentInstance) -> Result<()> {
        if ctx.provider().is_none() {
            tracing::warn!(agent = %ctx.name(), "No provider configured, prompts will fail");
        }
        Ok(())
    }

    async fn on_message(&self, ctx: &AgentInstance, msg: &Message) -> Result<Option<Message>> {
        let Some(prompt) = msg.get("prompt").and_then(|p| p.as_str()) else {
            return Ok(None);
        };
        let provider = ctx
            .provider()
            .ok_or_else(|| AgentError::Provider(format!("Agent '{}' has no provider", ctx.name())))?;

        let completion = provider
            .generate(prompt, ctx.model(), &Self::options(ctx))
            .await?;

        Ok(Some(message(json!({
            "type": "completion",
            "model": completion.model,
            "text": completion.text,
            "usage": {
                "prompt_tokens": completion.prompt_tokens,
                "completion_tokens": completion.completion_tokens,
                "total_tokens": completion.total_tokens,
            },
        }))))
    }
}
