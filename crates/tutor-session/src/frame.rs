//! Incremental decoder for the backend's streaming protocol.
//!
//! The backend answers every streaming operation with a sequence of frames
//! separated by a blank line. Each frame carries one `data: <json>` line:
//!
//! ```text
//! data: {"status": "analyzing", "message": "..."}
//!
//! data: {"content": "x"}
//!
//! data: {"done": true, "data": {...}}
//! ```
//!
//! Chunks may split a frame anywhere, including inside a multi-byte UTF-8
//! character, so bytes are buffered until the delimiter arrives and only then
//! interpreted as text.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{DecodeError, Result, TutorError};

const FRAME_DELIMITER: &[u8] = b"\n\n";

/// One decoded protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Progress notice, shown until content arrives.
    Status {
        /// Machine-readable phase name.
        status: String,
        /// Human-readable progress text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A fragment of the answer text.
    Content {
        /// Text to append.
        delta: String,
    },
    /// The backend failed; the stream is over.
    Error {
        /// Failure description.
        message: String,
    },
    /// The stream finished successfully.
    Done {
        /// Structured result of the operation, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl StreamEvent {
    /// Returns `true` for `error` and `done`, after which nothing more is
    /// expected.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    /// Returns the event kind as a string.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Content { .. } => "content",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }
}

// ============================================================================
// Frame decoder
// ============================================================================

/// Buffers raw chunks and yields events as whole frames become available.
///
/// The output for a byte sequence does not depend on how it was chunked.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds one chunk and returns every frame it completed, in order.
    ///
    /// A frame that fails to decode yields an `Err` entry; decoding carries on
    /// with the next frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<std::result::Result<StreamEvent, DecodeError>> {
        // CRLF framing collapses to LF; a bare CR never appears inside JSON text.
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_delimiter(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + FRAME_DELIMITER.len()).collect();
            if let Some(result) = decode_frame(&frame[..end]) {
                events.push(result);
            }
        }
        events
    }

    /// Number of buffered bytes not yet forming a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Ends the input, discarding any incomplete trailing frame.
    pub fn finish(&mut self) {
        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            warn!(
                bytes = self.buffer.len(),
                "Discarding incomplete frame at end of stream"
            );
        }
        self.buffer.clear();
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

/// Decodes one frame body. Returns `None` for frames carrying no data line.
fn decode_frame(bytes: &[u8]) -> Option<std::result::Result<StreamEvent, DecodeError>> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Some(Err(DecodeError::InvalidUtf8));
    };

    let mut data_lines = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // `event:`, `id:` and `retry:` fields carry nothing for this protocol.
    }

    if data_lines.is_empty() {
        return None;
    }
    let payload = data_lines.join("\n");
    if payload.trim().is_empty() {
        return None;
    }

    Some(parse_payload(&payload))
}

fn parse_payload(payload: &str) -> std::result::Result<StreamEvent, DecodeError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|source| DecodeError::InvalidJson {
            payload: payload.to_string(),
            source,
        })?;

    let Value::Object(object) = value else {
        return Err(DecodeError::UnrecognizedShape {
            payload: payload.to_string(),
        });
    };

    classify(&object).ok_or_else(|| DecodeError::UnrecognizedShape {
        payload: payload.to_string(),
    })
}

/// Picks the event kind. Precedence: error, done, content, status.
fn classify(object: &Map<String, Value>) -> Option<StreamEvent> {
    match object.get("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(message)) => {
            return Some(StreamEvent::Error {
                message: message.clone(),
            });
        }
        Some(other) => {
            return Some(StreamEvent::Error {
                message: other.to_string(),
            });
        }
    }

    if object.get("done").and_then(Value::as_bool) == Some(true) {
        let data = object.get("data").filter(|v| !v.is_null()).cloned();
        return Some(StreamEvent::Done { data });
    }

    if let Some(delta) = object.get("content").and_then(Value::as_str) {
        return Some(StreamEvent::Content {
            delta: delta.to_string(),
        });
    }

    if let Some(status) = object.get("status").and_then(Value::as_str) {
        let message = object
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        return Some(StreamEvent::Status {
            status: status.to_string(),
            message,
        });
    }

    None
}

// ============================================================================
// Stream adapter
// ============================================================================

struct DecodeState<S> {
    chunks: Pin<Box<S>>,
    decoder: FrameDecoder,
    ready: VecDeque<Result<StreamEvent>>,
    exhausted: bool,
}

/// Adapts a stream of byte chunks into a lazy stream of events.
///
/// Decode failures surface as recoverable `TutorError::Decode` items; a chunk
/// error is yielded once and ends the stream.
pub fn decode<S, B>(chunks: S) -> BoxStream<'static, Result<StreamEvent>>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.exhausted {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let chunk = chunk.as_ref();
                    debug!(bytes = chunk.len(), "Received chunk");
                    state.ready.extend(
                        state
                            .decoder
                            .push(chunk)
                            .into_iter()
                            .map(|r| r.map_err(TutorError::from)),
                    );
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    state.ready.push_back(Err(e));
                }
                None => {
                    state.decoder.finish();
                    state.exhausted = true;
                }
            }
        }
    })
    .boxed()
}
