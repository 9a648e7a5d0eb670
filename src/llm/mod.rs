//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities; clone them freely.
//! Every provider answers a [`CompletionRequest`] with a [`ChunkStream`]: a
//! lazy, single-pass sequence of [`ChunkEvent`]s that either runs to its end
//! or yields exactly one error and stops.

pub mod providers;
pub mod sse;

use std::pin::Pin;

use futures_util::Stream;
use thiserror::Error;

use crate::chat::request::CompletionRequest;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("malformed stream event: {0}")]
    Decode(String),
}

// ── Chunk events ──────────────────────────────────────────────────────────────

/// One incremental delivery from a streaming completion.
///
/// Either field may be absent: role-only preambles carry neither, the final
/// chunk usually carries only a stop-reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkEvent {
    pub fragment: Option<String>,
    pub stop_reason: Option<String>,
}

impl ChunkEvent {
    pub fn text(fragment: impl Into<String>) -> Self {
        Self { fragment: Some(fragment.into()), stop_reason: None }
    }

    /// Builder-style stop-reason.
    pub fn with_stop_reason(mut self, reason: impl Into<String>) -> Self {
        self.stop_reason = Some(reason.into());
        self
    }

    /// A chunk with no text, only a stop-reason.
    pub fn stop(reason: impl Into<String>) -> Self {
        Self { fragment: None, stop_reason: Some(reason.into()) }
    }
}

/// Boxed chunk stream handed out by every provider.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChunkEvent, ProviderError>> + Send>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `stream_chat` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Open a streaming completion for `request`.
    ///
    /// An `Err` here means the stream never started (transport failure, HTTP
    /// error status). Failures after the first byte arrive through the stream.
    pub async fn stream_chat(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.stream_chat(request).await,
            LlmProvider::OpenAiCompatible(p) => p.stream_chat(request).await,
        }
    }

    /// Lightweight reachability check.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            LlmProvider::Dummy(_) => Ok(()),
            LlmProvider::OpenAiCompatible(p) => p.ping().await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::OpenAiCompatible(_) => "openai",
        }
    }
}
