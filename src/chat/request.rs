//! Completion request assembly.
//!
//! [`build_request`] is a pure projection of a [`CompletionJob`] onto the
//! request a streaming client sends. Every parameter is already resolved on
//! the job; nothing is defaulted here.

use serde::Serialize;

use crate::chat::job::CompletionJob;

/// A single role + text pair sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Immutable chat completion request.
///
/// Field names follow the OpenAI chat completions body so providers can
/// serialize it as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub user: String,
}

impl CompletionRequest {
    /// Text of the (only) message, for providers that echo it back.
    pub fn prompt(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or("")
    }
}

/// History is flattened into the content upstream, so the request always
/// carries exactly one message.
pub fn build_request(job: &CompletionJob) -> CompletionRequest {
    let params = &job.params;
    CompletionRequest {
        model: params.model.clone(),
        messages: vec![ChatMessage {
            role: job.role.clone(),
            content: job.content.clone(),
        }],
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        user: job.user_id.clone(),
    }
}
