//! Console front end. Reads questions from stdin, streams each answer
//! through a [`CompletionJob`] and prints the resulting segments.
//!
//! [`ChatSession`] owns the in-memory [`Transcript`] so follow-up questions
//! carry prior turns. Runs until the `shutdown` token is cancelled (Ctrl-C)
//! or stdin is closed.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::{CompletionJob, JobOutcome, Transcript};
use crate::config::ChatDefaults;
use crate::error::AppError;
use crate::llm::LlmProvider;

// ── ChatSession ──────────────────────────────────────────────────────────────

pub struct ChatSession {
    provider: LlmProvider,
    defaults: ChatDefaults,
    user_id: String,
    transcript: Transcript,
}

impl ChatSession {
    pub fn new(
        provider: LlmProvider,
        defaults: ChatDefaults,
        user_id: impl Into<String>,
        history_cap: usize,
    ) -> Self {
        Self {
            provider,
            defaults,
            user_id: user_id.into(),
            transcript: Transcript::new(history_cap),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run one turn. Only completed, non-empty answers enter the transcript.
    pub async fn ask(&mut self, question: &str) -> Result<Arc<JobOutcome>, AppError> {
        let content = self.transcript.prompt(self.defaults.header.as_deref(), question);
        let job = CompletionJob::from_defaults(content, self.user_id.clone(), &self.defaults);
        debug!(job_id = %job.id, history = self.transcript.len(), "submitting console turn");

        let outcome = job
            .submit(self.provider.clone())
            .wait()
            .await
            .map_err(|e| AppError::Provider(e.to_string()))?;

        if !outcome.is_failed() && !outcome.segments.is_empty() {
            self.transcript.push(question, outcome.text().trim());
        }
        Ok(outcome)
    }
}

/// Print an outcome: one block per segment, failures noted on stderr.
pub fn print_outcome(outcome: &JobOutcome) {
    for segment in &outcome.segments {
        println!("{}", segment.trim());
        if outcome.segments.len() > 1 {
            println!();
        }
    }
    if let Some(err) = &outcome.error {
        eprintln!("[error] {err}");
    }
}

// ── run_console ──────────────────────────────────────────────────────────────

pub async fn run_console(mut session: ChatSession, shutdown: CancellationToken) -> Result<(), AppError> {
    info!("console started, type a question and press Enter. Ctrl-C to quit.");
    println!("─────────────────────────────────");
    println!(" chat-stream console  (Ctrl-C to quit)");
    println!("─────────────────────────────────");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("> ");
        use std::io::Write as _;
        let _ = std::io::stdout().flush();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                println!();
                info!("console shutting down");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Err(e) => {
                        warn!("console read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("console stdin closed");
                        break;
                    }
                    Ok(Some(input)) => {
                        let input = input.trim();
                        if input.is_empty() { continue; }

                        let outcome = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            outcome = session.ask(input) => outcome?,
                        };
                        print_outcome(&outcome);
                    }
                }
            }
        }
    }

    Ok(())
}
