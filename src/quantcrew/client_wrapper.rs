//! Shared primitives for provider-agnostic LLM clients.
//!
//! The pipeline talks to language models exclusively through the
//! [`ClientWrapper`] trait and the lightweight data types defined here.  The
//! trait abstracts over concrete vendor endpoints while the supporting
//! structs describe chat messages and streaming chunks.
//!
//! Every client exposes a single primitive: a stream of [`MessageChunk`]s
//! carrying `(content, is_reasoning, finished)`.  Blocking callers fold the
//! stream into an [`LlmResponse`] with [`collect_response`]; streaming
//! callers consume the chunks directly.  Thinking-enabled models interleave
//! reasoning chunks with content chunks on the same stream, which is how the
//! research agent captures its chain-of-thought separately from the final
//! report.

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message (model responses or exemplars).
    Assistant,
}

impl Role {
    /// The wire name of the role in the chat-completions format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Represents a generic message to be sent to an LLM.
#[derive(Debug, Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.  Stored as `Arc<str>` so that prompt histories can
    /// be cheaply cloned across retries and concurrent tasks.
    pub content: Arc<str>,
}

impl Message {
    /// Build a system message.
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::System,
            content: Arc::from(content.as_ref()),
        }
    }

    /// Build a user message.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::User,
            content: Arc::from(content.as_ref()),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Assistant,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// Represents a chunk of content in a streaming response.
///
/// Thinking-enabled models deliver their chain-of-thought as chunks with
/// `is_reasoning == true`, interleaved with ordinary content chunks.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk.  May be empty for
    /// chunks that only carry a finish marker.
    pub content: String,
    /// Whether this chunk belongs to the reasoning channel.
    pub is_reasoning: bool,
    /// `true` on the terminal chunk of the stream.
    pub finished: bool,
}

impl MessageChunk {
    /// A content chunk.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_reasoning: false,
            finished: false,
        }
    }

    /// A reasoning-channel chunk.
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_reasoning: true,
            finished: false,
        }
    }

    /// The terminal marker chunk.
    pub fn finish() -> Self {
        Self {
            content: String::new(),
            is_reasoning: false,
            finished: true,
        }
    }
}

/// Errors surfaced by a [`ClientWrapper`] implementation.
#[derive(Debug)]
pub enum ClientError {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// The provider could not be reached (DNS, TCP, TLS, broken stream).
    Connection(String),
    /// The provider answered with a non-success status.
    Api { status: u16, message: String },
    /// The provider answered but the payload could not be interpreted.
    Malformed(String),
}

impl ClientError {
    /// Only timeouts and connection failures are worth retrying; API and
    /// payload errors repeat deterministically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout | ClientError::Connection(_))
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout => write!(f, "LLM request timed out"),
            ClientError::Connection(msg) => write!(f, "LLM connection error: {}", msg),
            ClientError::Api { status, message } => {
                write!(f, "LLM API error (status {}): {}", status, message)
            }
            ClientError::Malformed(msg) => write!(f, "Malformed LLM response: {}", msg),
        }
    }
}

impl Error for ClientError {}

/// Type alias for a stream of message chunks compatible with `Send` executors.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk, ClientError>> + Send>>;

/// Per-call tuning knobs forwarded to the provider.
///
/// `max_retries` and `timeout` are overrides; when `None` the owning
/// [`LlmGateway`](crate::quantcrew::gateway::LlmGateway) substitutes its
/// configured defaults.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion budget in tokens, when the caller wants to cap it.
    pub max_tokens: Option<u32>,
    /// Whether to request the provider's reasoning channel.
    pub thinking: bool,
    /// Override for the gateway's retry count.
    pub max_retries: Option<u32>,
    /// Override for the gateway's per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            thinking: false,
            max_retries: None,
            timeout: None,
        }
    }
}

/// A fully collected model reply.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Concatenated content chunks.
    pub content: String,
    /// Concatenated reasoning chunks (empty unless thinking was enabled and
    /// the provider produced any).
    pub reasoning: String,
    /// Identifier of the model that produced the reply.
    pub model_name: String,
}

/// Trait-driven abstraction over a concrete LLM endpoint.
///
/// Implementations translate the request into the provider wire format and
/// expose the reply as a chunk stream.  All implementations **must** be
/// thread-safe (`Send + Sync`) so they can be shared between async tasks;
/// retries, timeouts, and concurrency capping live one layer up in
/// [`LlmGateway`](crate::quantcrew::gateway::LlmGateway).
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Issue a chat request and return the reply as a chunk stream.
    async fn send_message(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<ChunkStream, ClientError>;

    /// Return the identifier used to select the upstream model.
    fn model_name(&self) -> &str;
}

/// Drain a chunk stream into a single [`LlmResponse`].
pub async fn collect_response(
    mut stream: ChunkStream,
    model_name: &str,
) -> Result<LlmResponse, ClientError> {
    let mut content = String::new();
    let mut reasoning = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_reasoning {
            reasoning.push_str(&chunk.content);
        } else {
            content.push_str(&chunk.content);
        }
        if chunk.finished {
            break;
        }
    }
    Ok(LlmResponse {
        content,
        reasoning,
        model_name: model_name.to_string(),
    })
}

/// Wrap an already-complete reply as a one-shot chunk stream.
///
/// Providers without incremental transfer use this so that streaming and
/// blocking callers share the same primitive.
pub fn response_as_stream(content: String, reasoning: String) -> ChunkStream {
    let mut chunks = Vec::new();
    if !reasoning.is_empty() {
        chunks.push(Ok(MessageChunk::reasoning(reasoning)));
    }
    chunks.push(Ok(MessageChunk::content(content)));
    chunks.push(Ok(MessageChunk::finish()));
    Box::pin(futures_util::stream::iter(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_response_splits_channels() {
        let stream = response_as_stream("final answer".into(), "thinking aloud".into());
        let response = collect_response(stream, "test-model").await.unwrap();
        assert_eq!(response.content, "final answer");
        assert_eq!(response.reasoning, "thinking aloud");
        assert_eq!(response.model_name, "test-model");
    }

    #[tokio::test]
    async fn test_collect_response_without_reasoning() {
        let stream = response_as_stream("plain".into(), String::new());
        let response = collect_response(stream, "m").await.unwrap();
        assert_eq!(response.content, "plain");
        assert!(response.reasoning.is_empty());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::Connection("reset".into()).is_retryable());
        assert!(!ClientError::Api {
            status: 429,
            message: "quota".into()
        }
        .is_retryable());
        assert!(!ClientError::Malformed("bad json".into()).is_retryable());
    }
}
