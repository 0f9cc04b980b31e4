//! Response envelope detection and event-frame decoding for chat completion
//! endpoints.
//!
//! An endpoint answers either with one JSON object carrying
//! `choices[0].message.content`, or with a run of `data: ` frames each
//! carrying a `choices[0].delta.content` token. The frame decoder handles:
//! - Frames split across chunks
//! - Several frames in one chunk, with or without blank separator lines
//! - Comment lines, `event:`/`id:`/`retry:` fields and the `[DONE]` sentinel
//!
//! A frame that fails to parse is skipped and logged; it never fails the
//! whole body. A body that yields no text at all does, and so does an error
//! frame anywhere in the stream: the tokens before it are an incomplete answer.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ChatError;

const FRAME_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
/// Event-stream fields that carry nothing for the text.
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

fn is_ignored_field(line: &str) -> bool {
    IGNORED_FIELDS.iter().any(|field| line.starts_with(field))
}

/// Whether `body` opens like an event stream rather than a JSON document.
fn looks_like_event_stream(body: &str) -> bool {
    body.starts_with(FRAME_PREFIX) || body.starts_with(':') || is_ignored_field(body)
}

#[derive(Debug, Default, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionChoice {
    message: Option<ChoiceContent>,
    delta: Option<ChoiceContent>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceContent {
    content: Option<String>,
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A token from `choices[0].delta.content`.
    Delta(String),
    /// Valid frame without a content token (role announcement, finish reason).
    NoContent,
    /// The endpoint reported an error inside the stream.
    Error(String),
    /// End of stream signal (`[DONE]`).
    Done,
    /// The frame was not valid JSON and was dropped.
    Skipped(String),
}

/// Stateful frame decoder that buffers incomplete lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Trailing text not yet terminated by a newline.
    line_buffer: String,
    /// Payload lines of the frame being assembled.
    current: Option<Vec<String>>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame completed by it.
    ///
    /// A frame is complete when a blank line or the next `data:` line arrives.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.line_buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.line_buffer.find('\n') {
            let line: String = self.line_buffer.drain(..=newline).collect();
            self.accept_line(line.trim_end_matches(['\n', '\r']), &mut frames);
        }

        frames
    }

    /// Flushes whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let rest = std::mem::take(&mut self.line_buffer);
        if !rest.is_empty() {
            self.accept_line(rest.trim_end_matches('\r'), &mut frames);
        }
        self.flush(&mut frames);
        frames
    }

    /// Returns any partially received line (for debugging/testing).
    #[must_use]
    pub fn remaining_buffer(&self) -> &str {
        &self.line_buffer
    }

    fn accept_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        if line.trim().is_empty() {
            self.flush(frames);
        } else if let Some(payload) = line.strip_prefix(FRAME_PREFIX) {
            self.flush(frames);
            self.current = Some(vec![payload.trim().to_string()]);
        } else if line.starts_with(':') || is_ignored_field(line) {
            // Comment, keepalive or a field without content.
        } else if let Some(current) = self.current.as_mut() {
            current.push(line.trim().to_string());
        } else {
            debug!("Ignoring text outside of any frame");
        }
    }

    fn flush(&mut self, frames: &mut Vec<Frame>) {
        if let Some(lines) = self.current.take() {
            let payload = lines.join("\n");
            if !payload.trim().is_empty() {
                frames.push(parse_frame(payload.trim()));
            }
        }
    }
}

fn parse_frame(payload: &str) -> Frame {
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    let body: CompletionBody = match serde_json::from_str(payload) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, frame = %truncate(payload, 200), "Skipping unparsable frame");
            return Frame::Skipped(e.to_string());
        }
    };

    if let Some(error) = body.error {
        return Frame::Error(error_message(&error));
    }

    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .map_or(Frame::NoContent, Frame::Delta)
}

/// Decodes a complete chunked body in one go.
#[must_use]
pub fn decode_frames(body: &str) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = decoder.feed(body);
    frames.extend(decoder.finish());
    frames
}

/// Joins tokens and normalizes whitespace: runs collapse to one space and the
/// ends are trimmed.
#[must_use]
pub fn join_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    let joined: String = tokens.iter().map(AsRef::as_ref).collect();
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The two response shapes a chat completion endpoint may produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceEnvelope {
    /// One JSON object; holds `choices[0].message.content`.
    Single(String),
    /// Event frames; holds the `delta.content` tokens in arrival order.
    Chunked(Vec<String>),
}

impl InferenceEnvelope {
    /// Works out which shape `body` has and extracts its text parts.
    ///
    /// # Errors
    ///
    /// Returns `InferenceMalformed` when the body matches neither shape, or
    /// matches one but carries no text.
    pub fn detect(body: &str) -> Result<Self, ChatError> {
        let trimmed = body.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            return Err(ChatError::InferenceMalformed("empty body".to_string()));
        }

        if looks_like_event_stream(trimmed) {
            return Self::from_frames(decode_frames(trimmed));
        }

        let parsed: CompletionBody = serde_json::from_str(trimmed).map_err(|e| {
            ChatError::InferenceMalformed(format!("body is neither JSON nor event frames: {e}"))
        })?;

        if let Some(error) = parsed.error {
            return Err(ChatError::InferenceMalformed(format!(
                "endpoint reported an error: {}",
                error_message(&error)
            )));
        }

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(ChatError::InferenceMalformed("no choices in body".to_string()));
        };

        if let Some(content) = choice.message.and_then(|m| m.content) {
            return Ok(Self::Single(content));
        }
        // A lone, unprefixed streaming chunk.
        if let Some(content) = choice.delta.and_then(|d| d.content) {
            return Ok(Self::Chunked(vec![content]));
        }

        Err(ChatError::InferenceMalformed(
            "first choice carries no content".to_string(),
        ))
    }

    fn from_frames(frames: Vec<Frame>) -> Result<Self, ChatError> {
        let mut tokens = Vec::new();
        let mut skipped = 0usize;

        for frame in frames {
            match frame {
                Frame::Delta(token) => tokens.push(token),
                Frame::Skipped(_) => skipped += 1,
                Frame::Error(message) => {
                    warn!(received = tokens.len(), "Stream aborted by endpoint error; discarding tokens");
                    return Err(ChatError::InferenceMalformed(format!(
                        "stream reported an error: {message}"
                    )));
                }
                Frame::NoContent | Frame::Done => {}
            }
        }

        if skipped > 0 {
            warn!(skipped, kept = tokens.len(), "Dropped unparsable frames from chunked body");
        }

        if tokens.is_empty() {
            return Err(ChatError::InferenceMalformed(format!(
                "no content frames ({skipped} unparsable)"
            )));
        }

        Ok(Self::Chunked(tokens))
    }

    /// Final text for the envelope.
    ///
    /// # Errors
    ///
    /// Returns `InferenceMalformed` if the text is blank.
    pub fn into_text(self) -> Result<String, ChatError> {
        let text = match self {
            Self::Single(content) => content.trim().to_string(),
            Self::Chunked(tokens) => join_tokens(&tokens),
        };

        if text.is_empty() {
            return Err(ChatError::InferenceMalformed("response text is blank".to_string()));
        }
        Ok(text)
    }
}

/// Detects the envelope of a raw body and returns its normalized text.
///
/// # Errors
///
/// Returns `InferenceMalformed` if no text can be recovered.
pub fn normalize_response(body: &str) -> Result<String, ChatError> {
    InferenceEnvelope::detect(body)?.into_text()
}

/// Extracts an error message from an `error` field, which endpoints send either
/// as a string or as an object with a `message`.
fn error_message(error: &Value) -> String {
    if let Some(msg) = error.as_str() {
        return msg.to_string();
    }
    if let Some(msg) = error.get("message").and_then(Value::as_str) {
        return msg.to_string();
    }
    "Unknown error".to_string()
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}
