//! Chat completion core: request assembly, stream accumulation, history.

pub mod history;
pub mod job;
pub mod request;
pub mod segments;

pub use history::{content_with_history, Transcript, DEFAULT_HEADER};
pub use job::{CompletionJob, JobHandle, JobOutcome, JobStatus, SamplingParams};
pub use request::{build_request, ChatMessage, CompletionRequest};
