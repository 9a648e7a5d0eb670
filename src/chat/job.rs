//! Completion jobs: one conversational turn from request to segmented reply.
//!
//! A [`CompletionJob`] is built with content and a user id, optionally tuned,
//! then consumed by [`CompletionJob::submit`] (spawned, non-blocking) or
//! [`CompletionJob::process`] (awaited in place). Consumption makes reuse
//! impossible: every job moves Pending → Running → Completed | Failed once.
//!
//! Chunk folding happens on the single task that owns the job, so the segment
//! buffer needs no lock. Observers only see the immutable [`JobOutcome`]
//! published at the end through a `watch` channel.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::chat::request::build_request;
use crate::chat::segments::{Placement, SegmentBuffer};
use crate::config::ChatDefaults;
use crate::llm::{ChunkEvent, LlmProvider, ProviderError};

/// Default per-segment limit, matching the common chat message cap.
pub const DEFAULT_MAX_CHARS_PER_RESPONSE: usize = 4096;

/// Callback receiving the failure of a job. Called at most once.
pub type ErrorHandler = Box<dyn FnOnce(&ProviderError) + Send + 'static>;

// ── Parameters ────────────────────────────────────────────────────────────────

/// Generation parameters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Final, read-only result of a job.
///
/// A failed job still carries every segment accumulated before the failure.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub segments: Vec<String>,
    pub stop_reason: Option<String>,
    pub error: Option<ProviderError>,
}

impl JobOutcome {
    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// All segments joined back into the full reply.
    pub fn text(&self) -> String {
        self.segments.concat()
    }
}

#[derive(Debug, Clone)]
enum Progress {
    Pending,
    Running,
    Done(Arc<JobOutcome>),
}

#[derive(Debug, Error)]
#[error("job {0} ended without publishing an outcome")]
pub struct JobAborted(pub Uuid);

// ── Job ───────────────────────────────────────────────────────────────────────

pub struct CompletionJob {
    pub id: Uuid,
    pub content: String,
    pub user_id: String,
    pub role: String,
    pub params: SamplingParams,
    pub max_chars_per_response: usize,
    on_error: Option<ErrorHandler>,
    segments: SegmentBuffer,
    stop_reason: Option<String>,
}

impl fmt::Debug for CompletionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionJob")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("params", &self.params)
            .field("max_chars_per_response", &self.max_chars_per_response)
            .field("content_len", &self.content.len())
            .field("segments", &self.segments.len())
            .field("stop_reason", &self.stop_reason)
            .finish_non_exhaustive()
    }
}

impl CompletionJob {
    pub fn new(
        content: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
        params: SamplingParams,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            user_id: user_id.into(),
            role: role.into(),
            params,
            max_chars_per_response: DEFAULT_MAX_CHARS_PER_RESPONSE,
            on_error: None,
            segments: SegmentBuffer::new(),
            stop_reason: None,
        }
    }

    /// Build a job whose role, parameters and segment limit come from
    /// already-resolved configuration.
    pub fn from_defaults(
        content: impl Into<String>,
        user_id: impl Into<String>,
        defaults: &ChatDefaults,
    ) -> Self {
        let mut job = Self::new(content, user_id, defaults.role.clone(), defaults.sampling.clone());
        job.max_chars_per_response = defaults.max_chars_per_response;
        job
    }

    pub fn with_max_chars_per_response(mut self, max_chars: usize) -> Self {
        self.max_chars_per_response = max_chars;
        self
    }

    /// Replace the default failure sink (a `tracing` error event).
    ///
    /// A panicking handler is caught and logged; the job still publishes its
    /// outcome. With `panic = "abort"` the process exits instead.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&ProviderError) + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Spawn the job on the current tokio runtime and return immediately.
    pub fn submit(self, provider: LlmProvider) -> JobHandle {
        let id = self.id;
        let (tx, rx) = watch::channel(Progress::Pending);
        tokio::spawn(async move {
            tx.send_replace(Progress::Running);
            let outcome = self.process(&provider).await;
            tx.send_replace(Progress::Done(Arc::new(outcome)));
        });
        JobHandle { id, rx }
    }

    /// Open the stream for this job and fold it to completion.
    ///
    /// Never returns an error: failures go to the error handler and are
    /// recorded on the outcome.
    pub async fn process(self, provider: &LlmProvider) -> JobOutcome {
        let request = build_request(&self);
        debug!(
            job_id = %self.id,
            provider = provider.name(),
            model = %request.model,
            max_tokens = request.max_tokens,
            content_len = self.content.len(),
            "starting completion stream"
        );

        match provider.stream_chat(request).await {
            Ok(stream) => self.consume(stream).await,
            Err(e) => self.fail(e),
        }
    }

    /// Fold an already-open chunk stream into this job's segments.
    pub async fn consume<S>(mut self, mut stream: S) -> JobOutcome
    where
        S: Stream<Item = Result<ChunkEvent, ProviderError>> + Unpin,
    {
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => self.accept(chunk),
                Err(e) => return self.fail(e),
            }
        }
        self.finish(JobStatus::Completed, None)
    }

    fn accept(&mut self, chunk: ChunkEvent) {
        let Some(fragment) = chunk.fragment else {
            trace!(job_id = %self.id, stop_reason = ?chunk.stop_reason, "chunk without fragment ignored");
            return;
        };
        trace!(job_id = %self.id, fragment = %fragment, "chunk");

        // Only in-place growth records the stop-reason.
        match self.segments.push_fragment(&fragment, self.max_chars_per_response) {
            Placement::Grew => self.stop_reason = chunk.stop_reason,
            Placement::Split => {
                debug!(job_id = %self.id, segments = self.segments.len(), "segment limit reached, starting new segment");
            }
            Placement::First => {}
        }
    }

    fn fail(mut self, err: ProviderError) -> JobOutcome {
        match self.on_error.take() {
            Some(handler) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&err))).is_err() {
                    warn!(job_id = %self.id, error = %err, "error handler panicked");
                }
            }
            None => error!(
                job_id = %self.id,
                error = %err,
                partial = !self.segments.is_empty(),
                "completion stream failed"
            ),
        }
        self.finish(JobStatus::Failed, Some(err))
    }

    fn finish(self, status: JobStatus, error: Option<ProviderError>) -> JobOutcome {
        info!(
            job_id = %self.id,
            status = ?status,
            segments = self.segments.len(),
            stop_reason = ?self.stop_reason,
            "completion job finished"
        );
        JobOutcome {
            job_id: self.id,
            status,
            segments: self.segments.into_vec(),
            stop_reason: self.stop_reason,
            error,
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Observer side of a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    rx: watch::Receiver<Progress>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        match &*self.rx.borrow() {
            Progress::Pending => JobStatus::Pending,
            Progress::Running => JobStatus::Running,
            Progress::Done(outcome) => outcome.status,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// The outcome, if the job already finished.
    pub fn outcome(&self) -> Option<Arc<JobOutcome>> {
        match &*self.rx.borrow() {
            Progress::Done(outcome) => Some(Arc::clone(outcome)),
            _ => None,
        }
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&mut self) -> Result<Arc<JobOutcome>, JobAborted> {
        let id = self.id;
        let progress = self
            .rx
            .wait_for(|p| matches!(p, Progress::Done(_)))
            .await
            .map_err(|_| JobAborted(id))?;
        match &*progress {
            Progress::Done(outcome) => Ok(Arc::clone(outcome)),
            _ => Err(JobAborted(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use futures_util::stream;

    use crate::llm::providers::dummy::DummyProvider;

    fn params() -> SamplingParams {
        SamplingParams {
            model: "test-model".into(),
            max_tokens: 64,
            temperature: 0.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }

    fn job() -> CompletionJob {
        CompletionJob::new("Q: hi\nA:", "user-1", "user", params())
    }

    fn ok_stream(chunks: Vec<ChunkEvent>) -> impl Stream<Item = Result<ChunkEvent, ProviderError>> + Unpin {
        stream::iter(chunks.into_iter().map(Ok))
    }

    fn texts(fragments: &[&str]) -> Vec<ChunkEvent> {
        fragments.iter().map(|f| ChunkEvent::text(*f)).collect()
    }

    #[tokio::test]
    async fn hello_world_single_segment() {
        let out = job().consume(ok_stream(texts(&["Hello", " world"]))).await;
        assert_eq!(out.status, JobStatus::Completed);
        assert_eq!(out.segments, vec!["Hello world"]);
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn splits_at_limit() {
        let out = job()
            .with_max_chars_per_response(5)
            .consume(ok_stream(texts(&["abc", "de", "fgh"])))
            .await;
        assert_eq!(out.segments, vec!["abcde", "fgh"]);
        assert_eq!(out.text(), "abcdefgh");
    }

    #[tokio::test]
    async fn fragmentless_chunks_change_nothing() {
        let chunks = vec![
            ChunkEvent::default(),
            ChunkEvent::text("a"),
            ChunkEvent::text("b").with_stop_reason("length"),
            ChunkEvent::stop("stop"),
            ChunkEvent::default(),
        ];
        let out = job().consume(ok_stream(chunks)).await;
        assert_eq!(out.segments, vec!["ab"]);
        assert_eq!(out.stop_reason.as_deref(), Some("length"));
    }

    #[tokio::test]
    async fn stop_reason_follows_last_growing_chunk() {
        let chunks = vec![
            ChunkEvent::text("Hi"),
            ChunkEvent::text(" there").with_stop_reason("stop"),
        ];
        let out = job().consume(ok_stream(chunks)).await;
        assert_eq!(out.status, JobStatus::Completed);
        assert_eq!(out.stop_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn stop_reason_can_be_reset_by_later_growth() {
        let chunks = vec![
            ChunkEvent::text("a"),
            ChunkEvent::text("b").with_stop_reason("stop"),
            ChunkEvent::text("c"),
        ];
        let out = job().consume(ok_stream(chunks)).await;
        assert!(out.stop_reason.is_none());
    }

    #[tokio::test]
    async fn first_and_split_fragments_do_not_set_stop_reason() {
        let chunks = vec![ChunkEvent::text("only").with_stop_reason("stop")];
        let out = job().consume(ok_stream(chunks)).await;
        assert!(out.stop_reason.is_none());

        let chunks = vec![
            ChunkEvent::text("abc"),
            ChunkEvent::text("defg").with_stop_reason("length"),
        ];
        let out = job().with_max_chars_per_response(5).consume(ok_stream(chunks)).await;
        assert_eq!(out.segments, vec!["abc", "defg"]);
        assert!(out.stop_reason.is_none());
    }

    #[tokio::test]
    async fn empty_stream_completes_without_segments() {
        let out = job().consume(ok_stream(vec![])).await;
        assert_eq!(out.status, JobStatus::Completed);
        assert!(out.segments.is_empty());
        assert!(out.stop_reason.is_none());
    }

    #[tokio::test]
    async fn error_keeps_partial_segments_and_calls_handler_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);

        let items = vec![
            Ok(ChunkEvent::text("partial")),
            Ok(ChunkEvent::text(" answer")),
            Err(ProviderError::Stream("connection reset".into())),
            Ok(ChunkEvent::text(" never seen")),
        ];
        let out = job()
            .with_error_handler(move |e| sink.lock().unwrap().push(e.to_string()))
            .consume(stream::iter(items))
            .await;

        assert_eq!(out.status, JobStatus::Failed);
        assert!(out.is_failed());
        assert_eq!(out.segments, vec!["partial answer"]);
        assert!(matches!(out.error, Some(ProviderError::Stream(_))));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("connection reset"));
    }

    #[tokio::test]
    async fn panicking_handler_still_yields_outcome() {
        let items = vec![
            Ok(ChunkEvent::text("kept")),
            Err(ProviderError::Stream("boom".into())),
        ];
        let out = job()
            .with_error_handler(|_| panic!("handler failure"))
            .consume(stream::iter(items))
            .await;
        assert_eq!(out.status, JobStatus::Failed);
        assert_eq!(out.segments, vec!["kept"]);
        assert!(matches!(out.error, Some(ProviderError::Stream(_))));
    }

    #[tokio::test]
    async fn error_without_handler_still_terminates() {
        let items = vec![Err(ProviderError::Request("HTTP 500".into()))];
        let out = job().consume(stream::iter(items)).await;
        assert_eq!(out.status, JobStatus::Failed);
        assert!(out.segments.is_empty());
    }

    #[tokio::test]
    async fn from_defaults_copies_configuration() {
        let defaults = ChatDefaults {
            role: "system".into(),
            sampling: params(),
            max_chars_per_response: 100,
            header: None,
        };
        let j = CompletionJob::from_defaults("c", "u", &defaults);
        assert_eq!(j.role, "system");
        assert_eq!(j.params, params());
        assert_eq!(j.max_chars_per_response, 100);
        assert_eq!(j.content, "c");
        assert_eq!(j.user_id, "u");
    }

    #[tokio::test]
    async fn new_job_defaults_segment_limit() {
        assert_eq!(job().max_chars_per_response, DEFAULT_MAX_CHARS_PER_RESPONSE);
    }

    #[tokio::test]
    async fn submit_runs_to_completion() {
        let provider = LlmProvider::Dummy(DummyProvider);
        let mut handle = job().submit(provider);
        let out = handle.wait().await.unwrap();

        assert_eq!(out.status, JobStatus::Completed);
        assert_eq!(out.text(), "[echo] Q: hi\nA:");
        assert_eq!(out.job_id, handle.id());
        assert!(handle.is_done());
        assert_eq!(handle.status(), JobStatus::Completed);
        assert!(handle.outcome().is_some());
    }

    #[tokio::test]
    async fn concurrent_jobs_are_isolated() {
        let provider = LlmProvider::Dummy(DummyProvider);
        let mut a = CompletionJob::new("alpha", "a", "user", params()).submit(provider.clone());
        let mut b = CompletionJob::new("beta", "b", "user", params()).submit(provider);

        let (a, b) = (a.wait().await.unwrap(), b.wait().await.unwrap());
        assert_eq!(a.text(), "[echo] alpha");
        assert_eq!(b.text(), "[echo] beta");
    }
}
