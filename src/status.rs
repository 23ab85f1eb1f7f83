//! Shared build-status table for flow vertices.
//!
//! The [`StatusBoard`] is the single piece of mutable shared state in the
//! orchestrator: a map from vertex id to [`BuildStatus`], mutated only by the
//! active build attempt and snapshot-read by everything else (UI adapters,
//! tests, observers). Because at most one attempt is active at a time, a
//! plain mutex is enough; readers take cheap snapshots instead of holding the
//! lock.
//!
//! # Examples
//!
//! ```rust
//! use flowbuild::status::{BuildStatus, StatusBoard};
//!
//! let board = StatusBoard::new();
//! board.mark_to_build(["a", "b"]);
//! board.set("a", BuildStatus::Building);
//! board.set("a", BuildStatus::Built);
//!
//! assert_eq!(board.status("a"), Some(BuildStatus::Built));
//! assert_eq!(board.status("b"), Some(BuildStatus::ToBuild));
//! assert!(board.has_pending());
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Build state of a single vertex within one attempt.
///
/// A vertex that is not selected to run in the current attempt is
/// [`Inactive`](Self::Inactive) and is not transitioned further during that
/// attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Selected to run, waiting for its dependencies.
    ToBuild,
    /// A build request for this vertex is in flight.
    Building,
    /// Finished with a valid result.
    Built,
    /// Finished with an invalid result or a failed request.
    Error,
    /// Outside the scope of the current attempt; no request is issued.
    Inactive,
}

impl BuildStatus {
    /// True for statuses that still expect progress (`ToBuild`, `Building`).
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::ToBuild | Self::Building)
    }

    /// True for statuses a vertex can end an attempt in.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ToBuild => "to_build",
            Self::Building => "building",
            Self::Built => "built",
            Self::Error => "error",
            Self::Inactive => "inactive",
        };
        write!(f, "{label}")
    }
}

#[derive(Clone, Debug)]
struct VertexEntry {
    status: BuildStatus,
    /// Alias/group vertices resolve to a different reference id; everything
    /// else references itself.
    reference: String,
}

/// Shared vertex-id to build-status table.
///
/// Cloning a `StatusBoard` clones a handle to the same table, so the driver,
/// decoder, and observers all see one consistent view.
#[derive(Clone, Default)]
pub struct StatusBoard {
    entries: Arc<Mutex<FxHashMap<String, VertexEntry>>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a vertex with an explicit reference id.
    ///
    /// Plain vertices reference themselves; use this for alias/group vertices
    /// that resolve to another id.
    pub fn declare_with_reference(
        &self,
        id: impl Into<String>,
        reference: impl Into<String>,
        status: BuildStatus,
    ) {
        let id = id.into();
        let entry = VertexEntry {
            status,
            reference: reference.into(),
        };
        self.entries
            .lock()
            .expect("status board poisoned")
            .insert(id, entry);
    }

    /// Set (or declare) the status of a vertex.
    pub fn set(&self, id: impl Into<String>, status: BuildStatus) {
        let id = id.into();
        let mut entries = self.entries.lock().expect("status board poisoned");
        entries
            .entry(id.clone())
            .and_modify(|entry| entry.status = status)
            .or_insert_with(|| VertexEntry {
                status,
                reference: id,
            });
    }

    /// Mark every id in the iterator as [`BuildStatus::ToBuild`].
    pub fn mark_to_build<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = self.entries.lock().expect("status board poisoned");
        for id in ids {
            let id = id.into();
            entries
                .entry(id.clone())
                .and_modify(|entry| entry.status = BuildStatus::ToBuild)
                .or_insert_with(|| VertexEntry {
                    status: BuildStatus::ToBuild,
                    reference: id,
                });
        }
    }

    /// Current status of a vertex, if declared.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<BuildStatus> {
        self.entries
            .lock()
            .expect("status board poisoned")
            .get(id)
            .map(|entry| entry.status)
    }

    /// Reference id of a vertex, if declared.
    #[must_use]
    pub fn reference(&self, id: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("status board poisoned")
            .get(id)
            .map(|entry| entry.reference.clone())
    }

    /// Snapshot of the whole table.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, BuildStatus> {
        self.entries
            .lock()
            .expect("status board poisoned")
            .iter()
            .map(|(id, entry)| (id.clone(), entry.status))
            .collect()
    }

    /// True while any vertex is still `ToBuild` or `Building`.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.entries
            .lock()
            .expect("status board poisoned")
            .values()
            .any(|entry| entry.status.is_pending())
    }

    /// Retire every vertex still pending to [`BuildStatus::Inactive`].
    ///
    /// Called when an attempt reaches its terminal `end` event: anything that
    /// never ran did not run in this attempt. Returns the retired ids.
    pub fn retire_pending(&self) -> Vec<String> {
        let mut entries = self.entries.lock().expect("status board poisoned");
        let mut retired = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if entry.status.is_pending() {
                entry.status = BuildStatus::Inactive;
                retired.push(id.clone());
            }
        }
        retired
    }

    /// Number of declared vertices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("status board poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry. Used when a caller reuses one board across flows.
    pub fn clear(&self) {
        self.entries.lock().expect("status board poisoned").clear();
    }
}

impl fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().expect("status board poisoned");
        f.debug_map()
            .entries(entries.iter().map(|(id, entry)| (id, entry.status)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_declares_unknown_vertices() {
        let board = StatusBoard::new();
        board.set("v1", BuildStatus::Building);
        assert_eq!(board.status("v1"), Some(BuildStatus::Building));
        assert_eq!(board.reference("v1").as_deref(), Some("v1"));
    }

    #[test]
    fn retire_pending_only_touches_pending() {
        let board = StatusBoard::new();
        board.mark_to_build(["a", "b", "c"]);
        board.set("a", BuildStatus::Built);
        board.set("b", BuildStatus::Error);

        let mut retired = board.retire_pending();
        retired.sort();
        assert_eq!(retired, vec!["c".to_string()]);
        assert_eq!(board.status("a"), Some(BuildStatus::Built));
        assert_eq!(board.status("c"), Some(BuildStatus::Inactive));
        assert!(!board.has_pending());
    }

    #[test]
    fn alias_vertices_keep_their_reference() {
        let board = StatusBoard::new();
        board.declare_with_reference("group-1", "inner-vertex", BuildStatus::ToBuild);
        assert_eq!(board.reference("group-1").as_deref(), Some("inner-vertex"));
    }
}
