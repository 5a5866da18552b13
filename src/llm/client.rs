//! Chat-completions client: non-streaming and streaming modes.
//!
//! One `ChatClient` is built at startup and shared by every conversation; it
//! holds the outbound HTTP client and the bearer header, nothing per-call.

use std::future::Future;
use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::prompts::TEMPERATURE;
use super::streaming::{self, DeltaDecoder, StreamEvent};
use super::types::Message;
use crate::config::{Settings, API_KEY_VAR};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// No usable credential. The message is shown to the user as-is.
    #[error("{0}")]
    Auth(String),

    #[error("API error {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Parse(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// A newer request on the same conversation replaced this one.
    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Text for the conversation turn that replaces a failed reply.
    pub fn display_text(&self) -> String {
        match self {
            LlmError::Auth(message) => message.clone(),
            other => format!("Error: {}", other),
        }
    }

    fn missing_credential() -> Self {
        LlmError::Auth(format!("{} environment variable is not set.", API_KEY_VAR))
    }
}

/// How a streaming call ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// `[DONE]` arrived or the body ended.
    Completed,
    /// The cancellation token fired; no further deltas were delivered.
    Cancelled,
}

/// Anything that can produce assistant replies for a message history.
///
/// `ChatClient` is the real implementation; the seam exists so conversations
/// can run against scripted replies.
pub trait ChatBackend: Send + Sync {
    fn complete(
        &self,
        messages: &[Message],
        model: Option<&str>,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn complete_streaming<F>(
        &self,
        messages: &[Message],
        model: Option<&str>,
        on_delta: F,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<StreamStatus, LlmError>> + Send
    where
        F: FnMut(&str) + Send;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    has_credential: bool,
    default_model: String,
}

impl ChatClient {
    pub fn new(settings: &Settings) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = &settings.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| LlmError::Auth(format!("{} contains invalid characters.", API_KEY_VAR)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", settings.base_url, CHAT_COMPLETIONS_PATH),
            has_credential: settings.api_key.is_some(),
            default_model: settings.default_model().to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Caller override wins; otherwise the deployment default.
    pub fn resolve_model<'a>(&'a self, model: Option<&'a str>) -> &'a str {
        match model {
            Some(m) if !m.trim().is_empty() => m,
            _ => &self.default_model,
        }
    }

    async fn send(
        &self,
        messages: &[Message],
        model: &str,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        if !self.has_credential {
            log::warn!("[LLM] No {} set, not sending", API_KEY_VAR);
            return Err(LlmError::missing_credential());
        }

        log::info!(
            "[LLM] Model: {} ({} messages, stream={})",
            model,
            messages.len(),
            stream
        );

        let body = ChatRequest {
            model,
            messages,
            temperature: TEMPERATURE,
            stream: stream.then_some(true),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                log::error!("[LLM] HTTP request failed: {}", e);
                LlmError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("[LLM] API returned {}: {}", status, body);
            return Err(LlmError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Single request, whole reply at once.
    pub async fn complete(&self, messages: &[Message], model: Option<&str>) -> Result<String, LlmError> {
        let model = self.resolve_model(model);
        let start = Instant::now();

        let response = self.send(messages, model, false).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let json: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;
        let text = streaming::extract_message_content(&json).ok_or_else(|| {
            LlmError::Parse("response has no choices[0].message.content".to_string())
        })?;

        log::info!(
            "[LLM] API latency: {}ms, {} chars",
            start.elapsed().as_millis(),
            text.len()
        );
        Ok(text)
    }

    /// Streaming request. Each text fragment goes to `on_delta` in arrival
    /// order. Returns early with `Cancelled` once `cancel` fires; the token is
    /// checked while waiting for the next chunk and before every delta.
    pub async fn complete_streaming<F>(
        &self,
        messages: &[Message],
        model: Option<&str>,
        mut on_delta: F,
        cancel: &CancellationToken,
    ) -> Result<StreamStatus, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        if cancel.is_cancelled() {
            return Ok(StreamStatus::Cancelled);
        }

        let model = self.resolve_model(model);
        let start = Instant::now();

        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::info!("[LLM] Cancelled before response headers");
                return Ok(StreamStatus::Cancelled);
            }
            response = self.send(messages, model, true) => response?,
        };
        log::info!("[LLM] TTFB: {}ms", start.elapsed().as_millis());

        let mut decoder = DeltaDecoder::new();
        let mut delta_count = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("[LLM] Stream cancelled after {} deltas", delta_count);
                    return Ok(StreamStatus::Cancelled);
                }
                chunk = response.chunk() => chunk.map_err(|e| {
                    log::error!("[LLM] Stream error: {}", e);
                    LlmError::Transport(e.to_string())
                })?,
            };

            let (events, at_end) = match chunk {
                Some(bytes) => (decoder.feed(&bytes), false),
                None => (decoder.finish(), true),
            };

            for event in events {
                if cancel.is_cancelled() {
                    log::info!("[LLM] Stream cancelled after {} deltas", delta_count);
                    return Ok(StreamStatus::Cancelled);
                }
                match event {
                    StreamEvent::Delta(text) => {
                        if delta_count == 0 {
                            log::info!("[LLM] TTFT: {}ms", start.elapsed().as_millis());
                        }
                        delta_count += 1;
                        on_delta(&text);
                    }
                    StreamEvent::Done => {
                        log::info!(
                            "[LLM] Stream complete: {}ms, {} deltas, {} skipped",
                            start.elapsed().as_millis(),
                            delta_count,
                            decoder.skipped()
                        );
                        return Ok(StreamStatus::Completed);
                    }
                }
            }

            if at_end {
                log::info!(
                    "[LLM] Stream ended without [DONE]: {}ms, {} deltas",
                    start.elapsed().as_millis(),
                    delta_count
                );
                return Ok(StreamStatus::Completed);
            }
        }
    }
}

impl ChatBackend for ChatClient {
    async fn complete(&self, messages: &[Message], model: Option<&str>) -> Result<String, LlmError> {
        ChatClient::complete(self, messages, model).await
    }

    async fn complete_streaming<F>(
        &self,
        messages: &[Message],
        model: Option<&str>,
        on_delta: F,
        cancel: &CancellationToken,
    ) -> Result<StreamStatus, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        ChatClient::complete_streaming(self, messages, model, on_delta, cancel).await
    }
}
