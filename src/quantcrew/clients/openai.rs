//! OpenAI-compatible client wrapper exposing the `ClientWrapper` trait.
//!
//! The [`OpenAiClient`] speaks the chat-completions wire format directly via
//! `reqwest`, which makes it usable against any OpenAI-compatible endpoint
//! (OpenAI itself, DashScope, DeepSeek, vLLM gateways, ...).  Requests are
//! async-first: the client always asks for a server-sent-event stream and
//! decodes each `data:` frame into a [`MessageChunk`]; blocking callers let
//! the gateway collect the chunks.  Thinking-capable endpoints surface their
//! chain-of-thought through the non-standard `reasoning_content` delta
//! field, which maps onto the reasoning channel of the chunk stream.
//!
//! Vision-capable models accept image parts inside message content using the
//! same request shape; [`OpenAiClient::send_vision`] builds the multimodal
//! payload so text and vision configurations share one client.

use crate::quantcrew::client_wrapper::{
    collect_response, CallOptions, ChunkStream, ClientError, ClientWrapper, LlmResponse, Message,
    MessageChunk,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

/// Client wrapper for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiClient {
    /// Shared HTTP connection pool.
    http: reqwest::Client,
    /// Bearer token for the endpoint.
    api_key: String,
    /// Full URL of the chat-completions endpoint.
    base_url: String,
    /// Model identifier used for subsequent requests.
    pub model: String,
}

impl OpenAiClient {
    /// Create a client for the given endpoint and model.
    ///
    /// `base_url` is the full chat-completions URL, e.g.
    /// `https://api.openai.com/v1/chat/completions`.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Build a client from one endpoint configuration block.
    pub fn from_config(config: &crate::quantcrew::config::LlmEndpointConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.model_name.clone(),
        )
    }

    fn build_body(&self, wire_messages: Vec<Value>, options: &CallOptions) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": options.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if options.thinking {
            body["thinking"] = json!({"type": "enabled"});
        }
        body
    }

    async fn open_stream(&self, body: Value) -> Result<ChunkStream, ClientError> {
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Frames are split on newlines; the byte buffer keeps characters
        // that straddle two network chunks intact.
        let byte_stream = response.bytes_stream().boxed();
        let stream = futures_util::stream::unfold(
            (byte_stream, Vec::<u8>::new(), false),
            |(mut bytes, mut buffer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
                        let line = String::from_utf8_lossy(&line_bytes);
                        if let Some(chunk) = parse_stream_line(line.trim()) {
                            let finished = chunk.finished;
                            return Some((Ok(chunk), (bytes, buffer, finished)));
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(data)) => buffer.extend_from_slice(&data),
                        Some(Err(err)) => {
                            return Some((Err(map_transport_error(err)), (bytes, buffer, true)))
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }

    /// Uniform vision call: one text prompt plus image URLs, answered by the
    /// same endpoint with image parts embedded in the user message.
    pub async fn send_vision(
        &self,
        prompt: &str,
        image_urls: &[String],
        options: &CallOptions,
    ) -> Result<LlmResponse, ClientError> {
        let mut parts = vec![json!({"type": "text", "text": prompt})];
        for url in image_urls {
            parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
        }
        let wire_messages = vec![json!({"role": "user", "content": parts})];
        let body = self.build_body(wire_messages, options);
        let stream = self.open_stream(body).await?;
        collect_response(stream, &self.model).await
    }
}

fn map_transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else if err.is_decode() {
        ClientError::Malformed(err.to_string())
    } else {
        ClientError::Connection(err.to_string())
    }
}

/// Decode one SSE line into a chunk.  Empty lines, comments, and non-data
/// frames yield `None`; `[DONE]` and `finish_reason` frames mark the end of
/// the stream.
fn parse_stream_line(line: &str) -> Option<MessageChunk> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(MessageChunk::finish());
    }
    let frame: Value = serde_json::from_str(payload).ok()?;
    let choice = frame.get("choices")?.get(0)?;
    let delta = choice.get("delta")?;

    let reasoning = delta
        .get("reasoning_content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !reasoning.is_empty() {
        return Some(MessageChunk::reasoning(reasoning));
    }
    let content = delta
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let finished = choice
        .get("finish_reason")
        .map(|r| !r.is_null())
        .unwrap_or(false);
    Some(MessageChunk {
        content: content.to_string(),
        is_reasoning: false,
        finished,
    })
}

#[async_trait]
impl ClientWrapper for OpenAiClient {
    async fn send_message(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<ChunkStream, ClientError> {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content.as_ref()}))
            .collect();
        let body = self.build_body(wire_messages, options);
        self.open_stream(body).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
