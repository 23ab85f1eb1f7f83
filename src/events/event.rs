//! Wire events describing build progress.
//!
//! The execution service reports progress as a sequence of tagged JSON
//! records, `{"event": <tag>, "data": <payload>}`, framed as NDJSON: one
//! complete object per line. The same framing is used by all three delivery
//! strategies; only how the lines arrive differs (streamed body vs. polled
//! buffer).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ChatMessage, TokenDelta};
use crate::vertex::VertexBuildResult;

/// A decoded build event.
///
/// Tags and payloads mirror the wire protocol; the decoder in
/// [`crate::events::decoder`] turns these into status and observer effects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BuildEvent {
    /// The planner's ordering for this attempt.
    VerticesSorted(VerticesSorted),
    /// Coarse signal: a vertex started building.
    BuildStart(VertexRef),
    /// Coarse signal: a vertex finished building.
    BuildEnd(VertexRef),
    /// Detailed per-vertex completion carrying the full result.
    EndVertex(EndVertex),
    /// A whole chat message was produced.
    AddMessage(ChatMessage),
    /// An incremental text delta for an existing message.
    Token(TokenDelta),
    /// A previously added message was withdrawn.
    RemoveMessage(MessageRef),
    /// A failure, attributable to a vertex or to the build as a whole.
    Error(ErrorPayload),
    /// Terminal event; always the last one of an attempt.
    End(EndPayload),
}

impl BuildEvent {
    /// Wire tag of this event, for diagnostics.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::VerticesSorted(_) => "vertices_sorted",
            Self::BuildStart(_) => "build_start",
            Self::BuildEnd(_) => "build_end",
            Self::EndVertex(_) => "end_vertex",
            Self::AddMessage(_) => "add_message",
            Self::Token(_) => "token",
            Self::RemoveMessage(_) => "remove_message",
            Self::Error(_) => "error",
            Self::End(_) => "end",
        }
    }

    /// True for the terminal event.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// Parse one NDJSON line.
    ///
    /// A record without a `data` member (the service sends `end` that way on
    /// some versions) is normalized to an empty payload before decoding.
    pub fn from_line(line: &str) -> Result<Self, EventParseError> {
        let mut value: Value = serde_json::from_str(line)?;
        if let Some(object) = value.as_object_mut()
            && !object.contains_key("data")
        {
            object.insert("data".to_string(), Value::Object(Default::default()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Payload of `vertices_sorted`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VerticesSorted {
    /// Ordered ids of the first runnable wave.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Every vertex that will execute during this attempt.
    #[serde(default)]
    pub to_run: Vec<String>,
}

/// Payload naming a single vertex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexRef {
    pub id: String,
}

/// Payload of `end_vertex`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndVertex {
    pub build_data: VertexBuildResult,
}

/// Payload naming a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// Payload of `error`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: String,
    /// Vertex the failure originates from, when attributable.
    #[serde(default, alias = "source")]
    pub source_id: Option<String>,
    /// `"internal"` suppresses the chat-visible rendering.
    #[serde(default)]
    pub category: Option<String>,
}

impl ErrorPayload {
    /// True when the error should appear in the message sink.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        self.category.as_deref() != Some("internal")
    }
}

/// Payload of `end`. Some service versions attach the final outputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndPayload {
    #[serde(default)]
    pub result: Option<Value>,
}

/// Failures turning wire bytes into [`BuildEvent`]s.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum EventParseError {
    #[error("malformed event record: {source}")]
    #[diagnostic(
        code(flowbuild::events::malformed),
        help("every NDJSON line must be one complete {{\"event\", \"data\"}} object")
    )]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("event stream is not valid UTF-8")]
    #[diagnostic(code(flowbuild::events::encoding))]
    Encoding {
        #[from]
        source: std::string::FromUtf8Error,
    },
}

/// Parse a buffer of zero or more NDJSON records. Blank lines are skipped;
/// an empty buffer yields an empty vector (an empty poll is not an error).
pub fn parse_ndjson(buffer: &str) -> Result<Vec<BuildEvent>, EventParseError> {
    buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(BuildEvent::from_line)
        .collect()
}

/// Incremental NDJSON reassembler for chunked transports.
///
/// Byte chunks from a streamed response body can split a record anywhere,
/// including inside a multi-byte character, so the assembler buffers raw
/// bytes and only decodes complete lines.
#[derive(Debug, Default)]
pub struct NdjsonAssembler {
    pending: Vec<u8>,
}

impl NdjsonAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<BuildEvent>, EventParseError> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8(line)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            events.push(BuildEvent::from_line(line)?);
        }
        Ok(events)
    }

    /// Drain a trailing record that arrived without a final newline.
    pub fn finish(&mut self) -> Result<Option<BuildEvent>, EventParseError> {
        let rest = std::mem::take(&mut self.pending);
        let rest = String::from_utf8(rest)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(None);
        }
        BuildEvent::from_line(rest).map(Some)
    }
}
