//! LLM provider abstraction for nightfall-harness.
//!
//! Provides a unified async trait for interacting with LLM providers,
//! supporting streaming chat completions with cooperative cancellation.
//!
//! # Overview
//!
//! This module defines the core [`CompletionProvider`] trait and supporting
//! types for building the agent loop's LLM backend. The trait provides:
//!
//! - **Streaming completions** via [`CompletionProvider::complete`], yielding
//!   text chunks as they arrive rather than buffering a full response
//! - **Availability and readiness checks** so the daemon can broadcast
//!   `LIFECYCLE` events (`checking_model`, `pulling_model`, `model_ready`)
//!   before dispatching the first task
//! - **Standardized error handling** through [`ProviderError`], distinguishing
//!   transient failures (retried here) from permanent ones (surfaced to the
//!   caller)
//!
//! Concrete provider implementations (Anthropic, OpenAI, a local runtime,
//! etc.) are provided by dependent crates or configured at startup. This
//! crate includes a [`StubProvider`] for testing and placeholder scenarios.
//!
//! # Example
//!
//! ```rust,no_run
//! use nightfall_harness::provider::{CompletionProvider, Message, StubProvider};
//! use nightfall_harness::shutdown::ShutdownSignal;
//! use futures_util::StreamExt;
//!
//! async fn example(provider: impl CompletionProvider) {
//!     let shutdown = ShutdownSignal::new();
//!     let messages = vec![Message::user("Hello, world!")];
//!     let mut stream = provider.complete(messages, shutdown.subscribe());
//!     while let Some(chunk) = stream.next().await {
//!         if let Ok(text) = chunk {
//!             print!("{text}");
//!         }
//!     }
//! }
//! ```

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone)]
pub enum ProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("rate limited – retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("request timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Transient errors (connection reset/refused, DNS failure, timeout,
    /// rate limiting, and 5xx) are retried inside the adapter; everything
    /// else is permanent and surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout | ProviderError::RateLimited { .. }
        ) || matches!(self, ProviderError::Api(msg) if is_transient_api_message(msg))
    }
}

fn is_transient_api_message(msg: &str) -> bool {
    const MARKERS: &[&str] = &[
        "ECONNRESET",
        "ENOTFOUND",
        "ETIMEDOUT",
        "ECONNREFUSED",
        "429",
        "500",
        "502",
        "503",
        "504",
    ];
    MARKERS.iter().any(|m| msg.contains(m))
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
        }
    }

    /// Rough size estimate for context-budget accounting. Callers use a
    /// fixed chars-per-token heuristic rather than a real tokenizer.
    pub fn char_len(&self) -> usize {
        self.content.len()
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

// ---------------------------------------------------------------------------
// CompletionProvider trait
// ---------------------------------------------------------------------------

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Retry policy applied by adapters around a single streaming attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(16),
        }
    }
}

#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stream a completion for `messages`. `cancel` is the task's shutdown
    /// broadcast receiver; a tick (or channel close) on it should end the
    /// stream with [`ProviderError::Cancelled`] as soon as practical.
    fn complete(&self, messages: Vec<Message>, cancel: broadcast::Receiver<()>) -> ChunkStream;

    /// Whether the provider is reachable and configured (API key present,
    /// local runtime responding, etc.).
    async fn is_available(&self) -> bool;

    /// Ensure `model` is ready to serve requests, pulling/downloading it if
    /// the provider supports that (emits `LIFECYCLE pulling_model` progress
    /// via the caller, not this trait — the call simply blocks until ready
    /// or returns an error).
    async fn ensure_model_ready(&self, model: &str) -> Result<(), ProviderError>;

    /// Usage for the most recently completed call, if the provider reports
    /// token accounting.
    fn last_usage(&self) -> Option<Usage> {
        None
    }

    /// Human-readable provider name (e.g. "anthropic", "openai", "local").
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// StubProvider – returns an error for every call.
// ---------------------------------------------------------------------------

/// A placeholder provider that always returns `NotConfigured`. Real
/// implementations are supplied by whatever wires up the daemon at startup.
#[derive(Debug, Clone)]
pub struct StubProvider {
    provider_name: String,
}

impl StubProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            provider_name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for StubProvider {
    fn complete(&self, _messages: Vec<Message>, _cancel: broadcast::Receiver<()>) -> ChunkStream {
        let name = self.provider_name.clone();
        Box::pin(futures_util::stream::once(async move {
            Err(ProviderError::NotConfigured(format!(
                "{name} provider is not configured – install a concrete implementation"
            )))
        }))
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn ensure_model_ready(&self, _model: &str) -> Result<(), ProviderError> {
        Err(ProviderError::NotConfigured(self.provider_name.clone()))
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn transient_errors_are_flagged() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::RateLimited { retry_after_ms: 100 }.is_transient());
        assert!(ProviderError::Api("HTTP 503 Service Unavailable".into()).is_transient());
        assert!(!ProviderError::Api("HTTP 400 Bad Request".into()).is_transient());
        assert!(!ProviderError::NotConfigured("x".into()).is_transient());
    }

    #[tokio::test]
    async fn stub_provider_is_never_available() {
        let stub = StubProvider::new("local");
        assert!(!stub.is_available().await);
        assert!(stub.ensure_model_ready("any").await.is_err());
    }

    #[tokio::test]
    async fn stub_provider_stream_yields_single_error() {
        let stub = StubProvider::new("local");
        let (_tx, rx) = broadcast::channel(1);
        let mut stream = stub.complete(vec![Message::user("hi")], rx);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(ProviderError::NotConfigured(_))));
        assert!(stream.next().await.is_none());
    }
}
