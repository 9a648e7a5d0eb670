//! Conversation history flattening.
//!
//! Requests carry a single message, so prior turns are folded into the prompt
//! text as a Q/A transcript by [`content_with_history`]. [`Transcript`] keeps
//! the most recent turns of a session in memory; it is never persisted.

use std::collections::VecDeque;

/// Persona used when no header is configured.
pub const DEFAULT_HEADER: &str = "You are an AI who is having a conversation with a human. \
The human is trying to ask you about something. \
You should respond to the human's prompts appropriately. \
Try to have a conversation that is as natural as possible.";

/// Flatten a header, prior (question, answer) turns and a new question into
/// one prompt string ending in an open `A:`.
pub fn content_with_history<'a, I>(header: Option<&str>, history: I, question: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut content = format!("{}\n\n", header.unwrap_or(DEFAULT_HEADER));
    for (q, a) in history {
        content.push_str(&format!("Q: {q}\nA: {a}\n\n"));
    }
    content.push_str(&format!("Q: {question}\nA:"));
    content
}

/// Insertion-ordered, capacity-bounded list of past turns.
///
/// When full, the oldest turn is evicted.
#[derive(Debug, Clone)]
pub struct Transcript {
    turns: VecDeque<(String, String)>,
    cap: usize,
}

impl Transcript {
    pub fn new(cap: usize) -> Self {
        Self { turns: VecDeque::with_capacity(cap), cap }
    }

    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.cap == 0 {
            return;
        }
        if self.turns.len() == self.cap {
            self.turns.pop_front();
        }
        self.turns.push_back((question.into(), answer.into()));
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[cfg(test)]
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.turns.iter().map(|(q, a)| (q.as_str(), a.as_str()))
    }

    /// Prompt for `question` with every retained turn in front of it.
    pub fn prompt(&self, header: Option<&str>, question: &str) -> String {
        content_with_history(header, self.iter(), question)
    }
}
