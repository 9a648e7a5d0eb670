//! OpenAI-compatible streaming chat completion provider (`/v1/chat/completions`).
//!
//! Sends the [`CompletionRequest`] with `stream: true` and turns the
//! `text/event-stream` body into [`ChunkEvent`]s. All OpenAI wire types are
//! private to this module.

use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::{stream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::chat::request::CompletionRequest;
use crate::llm::sse::{SseDecoder, DONE_MARKER};
use crate::llm::{ChunkEvent, ChunkStream, ProviderError};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions` with
/// server-sent events.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…),
/// and hosted alternatives. Constructed once at startup, then cheaply cloned
/// because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    ///
    /// `timeout_seconds` bounds the whole exchange, streaming body included.
    pub fn new(
        api_base_url: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, api_key })
    }

    /// Lightweight reachability probe.
    ///
    /// Sends a HEAD request to the configured endpoint.  Any HTTP response
    /// (including 4xx) means the server is reachable.  Only a transport-level
    /// failure (connection refused, timeout) is treated as unreachable.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build ping client: {e}")))?;
        let mut req = client.head(&self.api_base_url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::Request(format!("unreachable: {e}")))
    }

    /// Start a streaming completion.
    ///
    /// Returns once response headers arrive; the body is consumed lazily by
    /// whoever polls the returned stream.
    pub async fn stream_chat(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let payload = StreamingRequest { request: &request, stream: true };

        debug!(
            url = %self.api_base_url,
            model = %request.model,
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "sending streaming LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;
        Ok(decode_stream(Box::pin(response.bytes_stream())))
    }
}

// ── Body decoding ─────────────────────────────────────────────────────────────

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    ready: VecDeque<Result<ChunkEvent, ProviderError>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, payloads: Result<Vec<String>, ProviderError>) {
        let payloads = match payloads {
            Ok(p) => p,
            Err(e) => {
                self.ready.push_back(Err(e));
                return;
            }
        };
        for payload in payloads {
            if self.finished {
                break;
            }
            if payload.trim() == DONE_MARKER {
                trace!("stream done marker received");
                self.finished = true;
                break;
            }
            let parsed = parse_chunk(&payload);
            let failed = parsed.is_err();
            self.ready.push_back(parsed);
            if failed {
                break;
            }
        }
    }
}

/// Turn a raw SSE byte stream into chunk events.
///
/// Ends at `data: [DONE]` or end of body. The first transport, decode or
/// server-reported error is yielded once and ends the stream.
fn decode_stream<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                if item.is_err() {
                    st.finished = true;
                    st.ready.clear();
                }
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let payloads = st.decoder.push(bytes.as_ref());
                    st.absorb(payloads);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "LLM stream interrupted");
                    st.ready.push_back(Err(ProviderError::Stream(e.to_string())));
                }
                None => {
                    let tail = st.decoder.finish().map(|t| t.into_iter().collect());
                    st.absorb(tail);
                    st.finished = true;
                }
            }
        }
    }))
}

fn parse_chunk(payload: &str) -> Result<ChunkEvent, ProviderError> {
    let frame: StreamFrame = serde_json::from_str(payload).map_err(|e| {
        error!(error = %e, "failed to deserialize LLM stream chunk");
        ProviderError::Decode(format!("{e}: {payload}"))
    })?;

    if let Some(err) = frame.error {
        error!(message = %err.message, "LLM stream reported an error");
        return Err(ProviderError::Stream(err.message));
    }

    let choice = frame.choices.into_iter().next();
    Ok(match choice {
        Some(c) => ChunkEvent { fragment: c.delta.content, stop_reason: c.finish_reason },
        None => ChunkEvent::default(),
    })
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StreamingRequest<'a> {
    #[serde(flatten)]
    request: &'a CompletionRequest,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    // some servers reuse the non-streaming `message` key
    #[serde(default, alias = "message")]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env.error.code.map(|v| match v {
            serde_json::Value::String(s) => format!(" [code={s}]"),
            other => format!(" [code={other}]"),
        }).unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}
