//! Incremental `text/event-stream` decoder.
//!
//! Network reads split events at arbitrary byte offsets, so bytes are buffered
//! until a full line is available. Only `data:` fields matter for chat
//! completions; `event:`, `id:` and `retry:` are accepted and dropped, comment
//! lines (leading `:`) are skipped. Multiple `data:` lines in one event are
//! joined with `\n`.

use std::str::from_utf8;

use tracing::trace;

use crate::llm::ProviderError;

/// Payload that terminates an OpenAI-style stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Longest unterminated line buffered before the stream is rejected.
pub const MAX_LINE_BYTES: usize = 1 << 20;

const LOGIFY_MAX_CHARS: usize = 100;

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    scanned: usize,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the data payload of every event completed by them.
    ///
    /// A line that grows past [`MAX_LINE_BYTES`] without a terminator is a
    /// decode error.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProviderError> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut start = 0;
        // bytes before `scan` are known to hold no '\n'
        let mut scan = std::mem::take(&mut self.scanned);
        while let Some(offset) = buf[scan..].iter().position(|&b| b == b'\n') {
            let end = scan + offset;
            let line = &buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(event) = self.handle_line(line)? {
                events.push(event);
            }
            start = end + 1;
            scan = start;
        }

        buf.drain(..start);
        if buf.len() > MAX_LINE_BYTES {
            return Err(ProviderError::Decode(format!(
                "event stream line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        self.scanned = buf.len();
        self.pending = buf;
        Ok(events)
    }

    /// Flush an event left open when the body ended without a blank line.
    pub fn finish(&mut self) -> Result<Option<String>, ProviderError> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.scanned = 0;
            let line = line.strip_suffix(b"\r").unwrap_or(&line).to_vec();
            if let Some(event) = self.handle_line(&line)? {
                return Ok(Some(event));
            }
        }
        Ok(self.data.take())
    }

    fn handle_line(&mut self, line: &[u8]) -> Result<Option<String>, ProviderError> {
        if line.is_empty() {
            return Ok(self.data.take());
        }

        let line = from_utf8(line).map_err(|e| {
            ProviderError::Decode(format!("invalid utf-8 in event stream: {e}"))
        })?;
        trace!(line = %logify(line), "sse line");

        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        Ok(None)
    }
}

fn logify(line: &str) -> String {
    line.chars().take(LOGIFY_MAX_CHARS).collect()
}
