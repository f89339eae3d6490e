//! Uniform LLM call surface with retries, timeouts, and stream collection.
//!
//! Every LLM round-trip in the pipeline goes through an [`LlmGateway`]: the
//! data agents and tool selection use the plain gateway, the research agent's
//! final report uses a thinking-enabled gateway, and the judges fan out over
//! the plain gateway in parallel.  The gateway owns the `(timeout,
//! max_retries, retry_delay)` policy — defaults `(60s, 3, 20s)` — and retries
//! only on timeouts and connection failures; API rejections and malformed
//! payloads fail immediately because they repeat deterministically.
//!
//! An optional process-wide [`Semaphore`] caps the number of in-flight calls
//! across every agent sharing the gateway.

use crate::quantcrew::client_wrapper::{
    collect_response, CallOptions, ClientError, ClientWrapper, LlmResponse, Message,
};
use log::warn;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Retry and timeout policy for a gateway.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Per-attempt timeout covering the request and the stream drain.
    pub timeout: Duration,
    /// How many times a retryable failure is re-attempted.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(20),
        }
    }
}

/// Errors surfaced by [`LlmGateway::run`].
#[derive(Debug)]
pub enum GatewayError {
    /// A non-retryable client failure.
    Client(ClientError),
    /// All attempts failed with retryable errors.
    Exhausted { attempts: u32, last: ClientError },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Client(err) => write!(f, "LLM call failed: {}", err),
            GatewayError::Exhausted { attempts, last } => {
                write!(f, "LLM call failed after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl Error for GatewayError {}

/// Retry/timeout wrapper around a shared [`ClientWrapper`].
pub struct LlmGateway {
    client: Arc<dyn ClientWrapper>,
    options: GatewayOptions,
    /// Optional process-wide cap on concurrent in-flight calls.
    permits: Option<Arc<Semaphore>>,
}

impl LlmGateway {
    /// Wrap a client with the default `(60s, 3, 20s)` policy.
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self {
            client,
            options: GatewayOptions::default(),
            permits: None,
        }
    }

    /// Override the retry/timeout policy (builder pattern).
    pub fn with_options(mut self, options: GatewayOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an in-flight cap across gateways (builder pattern).
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = Some(permits);
        self
    }

    /// Identifier of the wrapped model.
    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Issue a chat request, collecting the reply stream into an
    /// [`LlmResponse`].
    ///
    /// `options.max_retries` and `options.timeout` override the gateway
    /// policy for this call only.
    pub async fn run(
        &self,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<LlmResponse, GatewayError> {
        let timeout = options.timeout.unwrap_or(self.options.timeout);
        let max_retries = options.max_retries.unwrap_or(self.options.max_retries);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let _permit = match &self.permits {
                Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                None => None,
            };

            let outcome = tokio::time::timeout(timeout, async {
                let stream = self.client.send_message(messages, options).await?;
                collect_response(stream, self.client.model_name()).await
            })
            .await;

            let failure = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => err,
                Err(_) => ClientError::Timeout,
            };

            if !failure.is_retryable() {
                return Err(GatewayError::Client(failure));
            }
            if attempt > max_retries {
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    last: failure,
                });
            }
            warn!(
                "LLM call to {} failed (attempt {}/{}): {}; retrying in {:?}",
                self.client.model_name(),
                attempt,
                max_retries + 1,
                failure,
                self.options.retry_delay
            );
            tokio::time::sleep(self.options.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantcrew::client_wrapper::{response_as_stream, ChunkStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with a connection error a configured number of times, then
    /// answers normally.
    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientWrapper for FlakyClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _options: &CallOptions,
        ) -> Result<ChunkStream, ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ClientError::Connection("connection reset".into()))
            } else {
                Ok(response_as_stream("recovered".into(), String::new()))
            }
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    struct RejectingClient;

    #[async_trait]
    impl ClientWrapper for RejectingClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _options: &CallOptions,
        ) -> Result<ChunkStream, ClientError> {
            Err(ClientError::Api {
                status: 400,
                message: "bad request".into(),
            })
        }

        fn model_name(&self) -> &str {
            "rejecting"
        }
    }

    fn fast_options() -> GatewayOptions {
        GatewayOptions {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_connection_errors() {
        let client = Arc::new(FlakyClient {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let gateway = LlmGateway::new(client.clone()).with_options(fast_options());
        let response = gateway
            .run(&[Message::user("hi")], &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "recovered");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let client = Arc::new(FlakyClient {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let gateway = LlmGateway::new(client.clone()).with_options(fast_options());
        let err = gateway
            .run(&[Message::user("hi")], &CallOptions::default())
            .await
            .unwrap_err();
        match err {
            GatewayError::Exhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected Exhausted, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_api_errors_are_not_retried() {
        let gateway = LlmGateway::new(Arc::new(RejectingClient)).with_options(fast_options());
        let err = gateway
            .run(&[Message::user("hi")], &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Client(ClientError::Api { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_per_call_retry_override() {
        let client = Arc::new(FlakyClient {
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let gateway = LlmGateway::new(client.clone()).with_options(fast_options());
        let options = CallOptions {
            max_retries: Some(0),
            ..CallOptions::default()
        };
        let _ = gateway.run(&[Message::user("hi")], &options).await.unwrap_err();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
