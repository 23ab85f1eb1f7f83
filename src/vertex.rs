//! Per-vertex build results and outcomes.
//!
//! [`VertexBuildResult`] mirrors the execution service's per-vertex response:
//! a validity flag, an `outputs` map of loosely structured log entries, and
//! the ids of the vertices the service declares runnable next. Results are
//! immutable once created and retained for the session.
//!
//! [`VertexOutcome`] is the orchestrator's own view of how a vertex ended:
//! built, errored, or inactive. Consumers switch on the sum type instead of
//! inspecting sentinel payload shapes.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::json_ext;

/// One log entry attached to a vertex output.
///
/// The `kind` discriminator marks error entries; the message payload is
/// whatever the component produced (string, object, array).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputLog {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Value,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl OutputLog {
    /// True when this entry signals an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind.eq_ignore_ascii_case("error")
    }

    /// Human-readable text of this entry's message payload.
    #[must_use]
    pub fn text(&self) -> Vec<String> {
        let mut out = Vec::new();
        json_ext::collect_error_text(&self.message, &mut out);
        out
    }
}

/// An output maps to either a single log entry or a list of them, depending
/// on the component. Both wire forms are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputLogs {
    One(OutputLog),
    Many(Vec<OutputLog>),
}

impl OutputLogs {
    pub fn iter(&self) -> std::slice::Iter<'_, OutputLog> {
        match self {
            Self::One(entry) => std::slice::from_ref(entry).iter(),
            Self::Many(entries) => entries.iter(),
        }
    }
}

/// Structured payload of a vertex result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexData {
    /// Output name to log entry (or entries).
    #[serde(default)]
    pub outputs: FxHashMap<String, OutputLogs>,
}

/// Outcome of building a single vertex, as reported by the execution service.
///
/// Immutable once created. The orchestrator retains results for the session
/// so observers can correlate late UI updates to a finished vertex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexBuildResult {
    pub id: String,
    pub valid: bool,
    #[serde(default)]
    pub data: VertexData,
    /// Vertices the service declares runnable once this one finished.
    #[serde(default)]
    pub next_vertices_ids: Vec<String>,
    /// Vertices the service pruned as a consequence of this result.
    #[serde(default)]
    pub inactivated_vertices: Vec<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl VertexBuildResult {
    /// Extract every nested error-log message from the outputs map.
    ///
    /// For an invalid result this is the text shown to the user; an invalid
    /// result without any error-tagged entry falls back to all log text so
    /// the failure is never silent.
    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for logs in self.data.outputs.values() {
            for entry in logs.iter().filter(|entry| entry.is_error()) {
                messages.extend(entry.text());
            }
        }
        if messages.is_empty() && !self.valid {
            for logs in self.data.outputs.values() {
                for entry in logs.iter() {
                    messages.extend(entry.text());
                }
            }
        }
        messages
    }
}

/// How a vertex ended within one attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VertexOutcome {
    /// Finished with a valid result.
    Built(VertexBuildResult),
    /// Finished invalid or failed outright; carries the extracted error text.
    Errored { id: String, messages: Vec<String> },
    /// Outside the scope of this attempt; no request was made.
    Inactive { id: String },
}

impl VertexOutcome {
    /// The vertex this outcome belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Built(result) => &result.id,
            Self::Errored { id, .. } | Self::Inactive { id } => id,
        }
    }

    /// True when a build request was actually issued for this vertex.
    ///
    /// Inactive vertices do not count toward aggregate validity; a pruned
    /// branch must not make an otherwise valid attempt report invalid.
    #[must_use]
    pub fn executed(&self) -> bool {
        !matches!(self, Self::Inactive { .. })
    }

    /// True for a valid, executed result.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Built(_))
    }
}
