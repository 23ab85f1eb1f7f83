//! Applies wire events to the status model and observers.
//!
//! The [`EventDecoder`] is the single writer of build state during an
//! event-driven attempt: every [`BuildEvent`] becomes an effect on the
//! [`StatusBoard`], the [`MessageStore`], or the attempt's
//! [`BuildObserver`], per the protocol rules. It also owns the attempt's
//! aggregate accounting (executed, failed, overall validity).

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::events::event::{BuildEvent, ErrorPayload};
use crate::events::observer::{BuildFailure, BuildObserver, BuildSummary, MessageUpdate};
use crate::message::MessageStore;
use crate::status::{BuildStatus, StatusBoard};
use crate::types::RunId;
use crate::vertex::VertexOutcome;

/// Caller-supplied check run against the sorted vertex set before any vertex
/// builds. Rejecting aborts the whole attempt.
pub type SortedValidator = Arc<dyn Fn(&[String]) -> Result<(), String> + Send + Sync>;

/// Control-flow result of applying one event.
#[derive(Debug)]
pub enum DecodeStep {
    /// Keep feeding events.
    Continue,
    /// The terminal `end` event was processed; the attempt is over.
    Finished(BuildSummary),
}

/// Failures that abort decoding.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DecodeError {
    /// The pre-build validator refused the sorted vertex set.
    #[error("build rejected before start: {reason}")]
    #[diagnostic(
        code(flowbuild::decoder::rejected),
        help("the pre-build validator refused the sorted vertex set; no vertex was run")
    )]
    Rejected { reason: String },
}

/// Stateful event applier for one build attempt.
pub struct EventDecoder {
    board: StatusBoard,
    messages: MessageStore,
    observer: Arc<dyn BuildObserver>,
    run_id: RunId,
    min_vertex_duration: Duration,
    sorted_validator: Option<SortedValidator>,
    /// Per-vertex build start instants, for minimum-visible-duration pacing.
    started: FxHashMap<String, Instant>,
    /// Recorded results: the originating vertex (when attributable) and its
    /// validity. Build-level errors record with no vertex id.
    results: Vec<(Option<String>, bool)>,
    finished: Option<BuildSummary>,
}

impl EventDecoder {
    pub fn new(
        board: StatusBoard,
        messages: MessageStore,
        observer: Arc<dyn BuildObserver>,
        run_id: RunId,
    ) -> Self {
        Self {
            board,
            messages,
            observer,
            run_id,
            min_vertex_duration: Duration::ZERO,
            sorted_validator: None,
            started: FxHashMap::default(),
            results: Vec::new(),
            finished: None,
        }
    }

    /// Enforce a minimum visible build duration per vertex.
    ///
    /// Pure pacing for observers watching the board: a vertex that finishes
    /// faster than this holds its terminal state back for the remainder.
    #[must_use]
    pub fn with_min_vertex_duration(mut self, duration: Duration) -> Self {
        self.min_vertex_duration = duration;
        self
    }

    /// Install a pre-build validator for the sorted vertex set.
    #[must_use]
    pub fn with_sorted_validator(mut self, validator: SortedValidator) -> Self {
        self.sorted_validator = Some(validator);
        self
    }

    /// Apply one event.
    ///
    /// Suspends for pacing on `end_vertex`; everything else is synchronous.
    pub async fn apply(&mut self, event: BuildEvent) -> Result<DecodeStep, DecodeError> {
        if self.finished.is_some() {
            tracing::warn!(tag = event.tag(), "event after end; ignored");
            return Ok(DecodeStep::Continue);
        }
        tracing::debug!(tag = event.tag(), run_id = %self.run_id, "applying event");

        match event {
            BuildEvent::VerticesSorted(sorted) => {
                if let Some(validator) = &self.sorted_validator {
                    validator(&sorted.ids).map_err(|reason| DecodeError::Rejected { reason })?;
                }
                self.mark_to_build(&sorted.ids);
                self.observer
                    .on_ordered(&self.run_id, &sorted.ids, &sorted.to_run);
            }
            BuildEvent::BuildStart(vertex) => {
                self.started.entry(vertex.id.clone()).or_insert_with(Instant::now);
                self.board.set(vertex.id, BuildStatus::Building);
            }
            BuildEvent::BuildEnd(vertex) => {
                self.board.set(vertex.id, BuildStatus::Built);
            }
            BuildEvent::EndVertex(end_vertex) => {
                let result = end_vertex.build_data;
                self.pace(&result.id).await;

                let outcome = if result.valid {
                    self.board.set(&result.id, BuildStatus::Built);
                    self.results.push((Some(result.id.clone()), true));
                    VertexOutcome::Built(result.clone())
                } else {
                    let messages = result.error_messages();
                    self.board.set(&result.id, BuildStatus::Error);
                    self.results.push((Some(result.id.clone()), false));
                    self.report_vertex_failure(&result.id, &messages);
                    VertexOutcome::Errored {
                        id: result.id.clone(),
                        messages,
                    }
                };

                // Layered progress in event-driven mode: the finished vertex
                // unlocks its declared successors.
                self.mark_to_build(&result.next_vertices_ids);
                for id in &result.inactivated_vertices {
                    self.board.set(id, BuildStatus::Inactive);
                }
                self.observer.on_vertex_done(&outcome);
            }
            BuildEvent::AddMessage(message) => {
                let update = MessageUpdate::Added(message.clone());
                self.messages.add(message);
                self.observer.on_message(&update);
            }
            BuildEvent::RemoveMessage(message) => {
                self.messages.remove(&message.id);
                self.observer
                    .on_message(&MessageUpdate::Removed { id: message.id });
            }
            BuildEvent::Token(delta) => {
                if !self.messages.apply_token(&delta) {
                    tracing::warn!(message_id = %delta.id, "token for unknown message dropped");
                }
                self.observer.on_token(&delta);
            }
            BuildEvent::Error(error) => {
                self.apply_error(error);
            }
            BuildEvent::End(_) => {
                let summary = self.make_summary(false);
                for id in self.board.retire_pending() {
                    tracing::debug!(vertex = %id, "never ran this attempt; retired to inactive");
                }
                self.observer.on_complete(&summary);
                self.finished = Some(summary.clone());
                return Ok(DecodeStep::Finished(summary));
            }
        }
        Ok(DecodeStep::Continue)
    }

    /// A vertex failed: surface the extracted log text as a chat error
    /// message and report it upward.
    fn report_vertex_failure(&self, vertex_id: &str, messages: &[String]) {
        let text = messages.join("\n");
        let chat = crate::message::ChatMessage::error(&text);
        let update = MessageUpdate::Added(chat.clone());
        self.messages.add(chat);
        self.observer.on_message(&update);
        self.observer.on_error(&BuildFailure {
            vertex_id: Some(vertex_id.to_string()),
            message: text,
        });
    }

    fn apply_error(&mut self, error: ErrorPayload) {
        if error.is_user_visible() {
            let message = crate::message::ChatMessage::error(&error.error);
            let update = MessageUpdate::Added(message.clone());
            self.messages.add(message);
            self.observer.on_message(&update);
        }
        if let Some(vertex_id) = &error.source_id {
            self.board.set(vertex_id, BuildStatus::Error);
        } else {
            // Not attributable to one vertex; raise at build level.
            self.observer.on_error(&BuildFailure {
                vertex_id: None,
                message: error.error.clone(),
            });
        }
        self.results.push((error.source_id, false));
    }

    /// Finalize an attempt whose feed ended without a terminal `end` event
    /// (aborted stream, cancellation). Statuses are left as last reached.
    ///
    /// Idempotent: a second call returns the same summary.
    pub fn finalize(&mut self, stopped: bool) -> BuildSummary {
        if let Some(summary) = &self.finished {
            return summary.clone();
        }
        let summary = self.make_summary(stopped);
        self.observer.on_complete(&summary);
        self.finished = Some(summary.clone());
        summary
    }

    /// True once the attempt reached its terminal accounting.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    fn make_summary(&self, stopped: bool) -> BuildSummary {
        BuildSummary {
            run_id: self.run_id.clone(),
            valid: self.results.iter().all(|(_, valid)| *valid),
            executed: self
                .results
                .iter()
                .filter(|(vertex, _)| vertex.is_some())
                .count(),
            failed: self.results.iter().filter(|(_, valid)| !valid).count(),
            stopped,
        }
    }

    fn mark_to_build(&mut self, ids: &[String]) {
        let now = Instant::now();
        for id in ids {
            self.started.insert(id.clone(), now);
        }
        self.board.mark_to_build(ids.iter().cloned());
    }

    /// Hold back a terminal state until the vertex has been visibly building
    /// for the configured minimum.
    async fn pace(&self, vertex_id: &str) {
        if self.min_vertex_duration.is_zero() {
            return;
        }
        let Some(started) = self.started.get(vertex_id) else {
            return;
        };
        let elapsed = started.elapsed();
        if elapsed < self.min_vertex_duration {
            tokio::time::sleep(self.min_vertex_duration - elapsed).await;
        }
    }
}
