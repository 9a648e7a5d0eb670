//! Dummy LLM provider: streams the prompt back prefixed with `[echo]`.
//! Used for exercising the full job lifecycle without a real API key.

use futures_util::stream;

use crate::chat::request::CompletionRequest;
use crate::llm::{ChunkEvent, ChunkStream, ProviderError};

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    /// One chunk per word (trailing whitespace kept), `"stop"` on the last
    /// word, then a fragment-less terminal chunk like real servers send.
    pub async fn stream_chat(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let reply = format!("[echo] {}", request.prompt());
        let mut chunks: Vec<ChunkEvent> = reply.split_inclusive(' ').map(ChunkEvent::text).collect();
        if let Some(last) = chunks.pop() {
            chunks.push(last.with_stop_reason("stop"));
        }
        chunks.push(ChunkEvent::stop("stop"));

        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}
