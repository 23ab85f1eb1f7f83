//! Observer interface for build progress.
//!
//! The orchestrator emits to a single [`BuildObserver`] instead of threading
//! optional callbacks through every call layer. All methods have no-op
//! defaults, so an observer implements exactly the capabilities it cares
//! about.
//!
//! Three implementations are provided: [`NullObserver`] for callers that only
//! read the status board, [`MemoryObserver`] for tests and snapshots, and
//! [`ChannelObserver`] for streaming notifications to an async consumer.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, TokenDelta};
use crate::types::RunId;
use crate::vertex::VertexOutcome;

/// A change to the message sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessageUpdate {
    Added(ChatMessage),
    Removed { id: String },
}

/// A failure reported upward during an attempt.
///
/// `vertex_id` is absent for build-level failures that are not attributable
/// to a single vertex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFailure {
    pub vertex_id: Option<String>,
    pub message: String,
}

/// Final accounting of one build attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub run_id: RunId,
    /// Logical AND over every executed vertex result; inactive vertices do
    /// not participate.
    pub valid: bool,
    /// Number of vertices that actually ran.
    pub executed: usize,
    /// Number of failed results, including build-level errors.
    pub failed: usize,
    /// True when the attempt ended through cancellation.
    pub stopped: bool,
}

/// Receiver for everything an attempt reports while it runs.
///
/// Methods are synchronous and must not block: they are called from the
/// decoding hot path. Push work onto a channel if it is heavy.
pub trait BuildObserver: Send + Sync {
    /// The planner's order arrived; `to_run` is the executing subset.
    fn on_ordered(&self, run_id: &RunId, ids: &[String], to_run: &[String]) {
        let _ = (run_id, ids, to_run);
    }

    /// A vertex reached a terminal outcome.
    fn on_vertex_done(&self, outcome: &VertexOutcome) {
        let _ = outcome;
    }

    /// A message was added to or removed from the conversation.
    fn on_message(&self, update: &MessageUpdate) {
        let _ = update;
    }

    /// An incremental token delta arrived.
    fn on_token(&self, delta: &TokenDelta) {
        let _ = delta;
    }

    /// A vertex-level or build-level failure was recorded.
    fn on_error(&self, failure: &BuildFailure) {
        let _ = failure;
    }

    /// The attempt finished; terminal accounting.
    fn on_complete(&self, summary: &BuildSummary) {
        let _ = summary;
    }

    /// The attempt was cancelled. Fired exactly once per attempt.
    fn on_stopped(&self) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl BuildObserver for NullObserver {}

/// One recorded observer notification, for snapshots.
#[derive(Clone, Debug, PartialEq)]
pub enum ObserverRecord {
    Ordered {
        run_id: RunId,
        ids: Vec<String>,
        to_run: Vec<String>,
    },
    VertexDone(VertexOutcome),
    Message(MessageUpdate),
    Token(TokenDelta),
    Error(BuildFailure),
    Complete(BuildSummary),
    Stopped,
}

/// In-memory observer for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemoryObserver {
    records: Arc<Mutex<Vec<ObserverRecord>>>,
}

impl MemoryObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every notification received so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObserverRecord> {
        self.records.lock().expect("observer poisoned").clone()
    }

    pub fn clear(&self) {
        self.records.lock().expect("observer poisoned").clear();
    }

    fn record(&self, record: ObserverRecord) {
        self.records.lock().expect("observer poisoned").push(record);
    }
}

impl BuildObserver for MemoryObserver {
    fn on_ordered(&self, run_id: &RunId, ids: &[String], to_run: &[String]) {
        self.record(ObserverRecord::Ordered {
            run_id: run_id.clone(),
            ids: ids.to_vec(),
            to_run: to_run.to_vec(),
        });
    }

    fn on_vertex_done(&self, outcome: &VertexOutcome) {
        self.record(ObserverRecord::VertexDone(outcome.clone()));
    }

    fn on_message(&self, update: &MessageUpdate) {
        self.record(ObserverRecord::Message(update.clone()));
    }

    fn on_token(&self, delta: &TokenDelta) {
        self.record(ObserverRecord::Token(delta.clone()));
    }

    fn on_error(&self, failure: &BuildFailure) {
        self.record(ObserverRecord::Error(failure.clone()));
    }

    fn on_complete(&self, summary: &BuildSummary) {
        self.record(ObserverRecord::Complete(summary.clone()));
    }

    fn on_stopped(&self) {
        self.record(ObserverRecord::Stopped);
    }
}

/// Observer that forwards every notification to a flume channel.
///
/// Useful for per-request streaming: hand the receiver to whatever renders
/// progress (SSE endpoint, TUI task) and let it drain at its own pace. A
/// dropped receiver silently discards further notifications; a slow consumer
/// must not stall the build.
pub struct ChannelObserver {
    tx: flume::Sender<ObserverRecord>,
}

impl ChannelObserver {
    #[must_use]
    pub fn new(tx: flume::Sender<ObserverRecord>) -> Self {
        Self { tx }
    }

    /// Convenience constructor returning the paired receiver.
    #[must_use]
    pub fn unbounded() -> (Self, flume::Receiver<ObserverRecord>) {
        let (tx, rx) = flume::unbounded();
        (Self::new(tx), rx)
    }

    fn send(&self, record: ObserverRecord) {
        if self.tx.send(record).is_err() {
            tracing::debug!("observer channel receiver dropped; notification discarded");
        }
    }
}

impl BuildObserver for ChannelObserver {
    fn on_ordered(&self, run_id: &RunId, ids: &[String], to_run: &[String]) {
        self.send(ObserverRecord::Ordered {
            run_id: run_id.clone(),
            ids: ids.to_vec(),
            to_run: to_run.to_vec(),
        });
    }

    fn on_vertex_done(&self, outcome: &VertexOutcome) {
        self.send(ObserverRecord::VertexDone(outcome.clone()));
    }

    fn on_message(&self, update: &MessageUpdate) {
        self.send(ObserverRecord::Message(update.clone()));
    }

    fn on_token(&self, delta: &TokenDelta) {
        self.send(ObserverRecord::Token(delta.clone()));
    }

    fn on_error(&self, failure: &BuildFailure) {
        self.send(ObserverRecord::Error(failure.clone()));
    }

    fn on_complete(&self, summary: &BuildSummary) {
        self.send(ObserverRecord::Complete(summary.clone()));
    }

    fn on_stopped(&self) {
        self.send(ObserverRecord::Stopped);
    }
}
