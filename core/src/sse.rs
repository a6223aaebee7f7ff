//! Server-Sent-Events decoding.
//!
//! [`SseDecoder`] is the pure state machine: bytes in, logical `data:` events
//! out. [`sse_events`] drives it from a [`BodyReader`] under a cancellation
//! token and guarantees the reader is released exactly once.

use std::pin::Pin;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::run_cancellable;
use crate::transport::{release_reader, BodyReader};
use crate::{ParleyError, Result};

pub type SseStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Incremental decoder tolerant of CRLF/LF delimiters and chunk splits anywhere,
/// including inside multi-byte UTF-8 sequences.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid sequence in the middle: decode lossily and move on
            Err(_) => self.pending.len(),
        };
        let decoded: Vec<u8> = self.pending.drain(..valid).collect();
        self.buffer.push_str(&String::from_utf8_lossy(&decoded));
        self.drain_events()
    }

    /// Flush whatever is buffered at end of stream, even without a trailing blank line.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        let mut events = self.drain_events();
        let tail = std::mem::take(&mut self.buffer);
        if let Some(ev) = event_data(&tail) {
            events.push(ev);
        }
        events
    }

    fn drain_events(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        while let Some((block_end, next_start)) = find_boundary(&self.buffer) {
            if let Some(ev) = event_data(&self.buffer[..block_end]) {
                events.push(ev);
            }
            self.buffer.drain(..next_start);
        }
        events
    }
}

/// Locate the first `\r?\n\r?\n`; returns (end of event block, start of remainder).
fn find_boundary(buf: &str) -> Option<(usize, usize)> {
    let bytes = buf.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let mut j = i + 1;
            if j < bytes.len() && bytes[j] == b'\r' {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'\n' {
                let block_end = if i > 0 && bytes[i - 1] == b'\r' { i - 1 } else { i };
                return Some((block_end, j + 1));
            }
        }
        i += 1;
    }
    None
}

/// Join the trimmed, non-empty `data:` lines of one block with `\n`.
fn event_data(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Decode `reader` into a stream of logical events.
///
/// Reads observe `token`; a read that fails while the token is cancelled is
/// reported as a cancellation error. When the stream ends (normally or with an
/// error) the reader's `cancel` is invoked exactly once. Cancel failures that
/// are abort-like or report an already-closed body are swallowed; any other
/// cancel failure is raised after the primary error, which takes priority.
/// Dropping the stream early drops the reader, which releases it as well.
pub fn sse_events(reader: Box<dyn BodyReader>, token: CancellationToken) -> SseStream {
    sse_events_until(reader, token, |_| false)
}

/// Like [`sse_events`], but ends the stream at the first event for which
/// `is_terminal` returns true. The terminal event is not yielded, nothing
/// after it is read, and the reader is released before the stream finishes.
pub fn sse_events_until<F>(
    mut reader: Box<dyn BodyReader>,
    token: CancellationToken,
    is_terminal: F,
) -> SseStream
where
    F: Fn(&str) -> bool + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut failure: Option<ParleyError> = None;

        'read: loop {
            match run_cancellable(&token, reader.read()).await {
                Ok(Some(chunk)) => {
                    for event in decoder.push(&chunk) {
                        if is_terminal(&event) {
                            debug!(target: "sse", "Terminal event received; releasing reader");
                            break 'read;
                        }
                        yield Ok::<String, ParleyError>(event);
                    }
                }
                Ok(None) => {
                    for event in decoder.finish() {
                        if is_terminal(&event) {
                            break;
                        }
                        yield Ok(event);
                    }
                    break;
                }
                Err(e) => {
                    let e = if token.is_cancelled() && !e.is_abort_like() {
                        ParleyError::Cancelled(format!("stream read cancelled: {e}"))
                    } else {
                        e
                    };
                    failure = Some(e);
                    break;
                }
            }
        }

        let released = release_reader(reader.as_mut()).await;
        match (failure, released) {
            (Some(e), Err(cancel_err)) => {
                debug!(target: "sse", error = %cancel_err, "Reader cancel also failed");
                yield Err(e);
                yield Err(cancel_err);
            }
            (Some(e), Ok(())) => {
                yield Err(e);
            }
            (None, Err(cancel_err)) => {
                yield Err(cancel_err);
            }
            (None, Ok(())) => {}
        }
    })
}
