//! Ollama provider: `/api/generate` over HTTP with NDJSON streaming

use super::{Completion, GenerateOptions, Provider, TextStream};
use crate::config::ProviderConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Ollama HTTP provider
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Result of parsing one NDJSON line
#[derive(Debug, PartialEq)]
enum Frame {
    Chunk(String),
    Done(String),
    Skip,
}

impl OllamaProvider {
    /// Create a provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Base URL of the Ollama server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_generate(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if !stream {
            request = request.timeout(self.timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }
        Ok(response)
    }
}

/// Build the `/api/generate` request body
///
/// `temperature` is lifted to the top level, `max_tokens` maps to
/// `num_predict`, everything else passes through as backend options.
fn build_request(prompt: &str, model: &str, options: &GenerateOptions, stream: bool) -> serde_json::Value {
    let mut backend_options = options.clone();
    let temperature = backend_options
        .remove("temperature")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_TEMPERATURE);
    if let Some(max_tokens) = backend_options.remove("max_tokens") {
        backend_options.insert("num_predict".to_string(), max_tokens);
    }

    serde_json::json!({
        "model": model,
        "prompt": prompt,
        "temperature": temperature,
        "stream": stream,
        "options": backend_options,
    })
}

fn parse_frame(line: &[u8]) -> Frame {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Frame::Skip;
    }
    match serde_json::from_slice::<StreamFrame>(line) {
        Ok(frame) if frame.done => Frame::Done(frame.response),
        Ok(frame) if frame.response.is_empty() => Frame::Skip,
        Ok(frame) => Frame::Chunk(frame.response),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed stream frame");
            Frame::Skip
        }
    }
}

struct LineReader {
    body: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
    buffer: BytesMut,
    finished: bool,
}

impl LineReader {
    async fn next_chunk(mut self) -> Option<(Result<String>, Self)> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line = self.buffer.split_to(pos + 1);
                match parse_frame(&line) {
                    Frame::Chunk(text) => return Some((Ok(text), self)),
                    Frame::Done(text) => {
                        self.finished = true;
                        if text.is_empty() {
                            return None;
                        }
                        return Some((Ok(text), self));
                    }
                    Frame::Skip => continue,
                }
            }

            match self.body.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some((Err(AgentError::Provider(format!("Stream read failed: {}", e))), self));
                }
                None => {
                    // Backend closed without a trailing newline
                    self.finished = true;
                    let rest = self.buffer.split();
                    return match parse_frame(&rest) {
                        Frame::Chunk(text) | Frame::Done(text) if !text.is_empty() => {
                            Some((Ok(text), self))
                        }
                        _ => None,
                    };
                }
            }
        }
    }
}

fn text_stream(body: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>) -> TextStream {
    let reader = LineReader {
        body,
        buffer: BytesMut::new(),
        finished: false,
    };
    futures::stream::unfold(reader, LineReader::next_chunk).boxed()
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerateOptions,
    ) -> Result<Completion> {
        let body = build_request(prompt, model, options, false);
        let response: GenerateResponse = self
            .post_generate(&body, false)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Failed to decode response: {}", e)))?;

        tracing::debug!(
            model = %model,
            prompt_tokens = response.prompt_eval_count,
            completion_tokens = response.eval_count,
            "Generation completed"
        );

        Ok(Completion {
            id: format!("ollama-{}", uuid::Uuid::new_v4()),
            model: model.to_string(),
            text: response.response,
            prompt_tokens: response.prompt_eval_count,
            completion_tokens: response.eval_count,
            total_tokens: response.prompt_eval_count + response.eval_count,
        })
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        model: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let body = build_request(prompt, model, options, true);
        let response = self.post_generate(&body, true).await?;
        Ok(text_stream(response.bytes_stream().boxed()))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
