//! Core identifier types for the flowbuild orchestrator.
//!
//! This module defines the small identifier types shared across the
//! orchestrator. Everything else that looks like an id (flow ids, vertex ids,
//! job ids) stays a plain string at the wire boundary; the run id gets a
//! newtype because it correlates every event, status change, and observer
//! notification of one build attempt and mixing it up with a vertex id is a
//! real hazard.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation token for one build attempt.
///
/// Created when the planner resolves an execution order. The planner normally
/// supplies the value; when it omits one, a fresh UUID is generated so
/// observers can always tie events back to a specific attempt.
///
/// # Examples
///
/// ```rust
/// use flowbuild::types::RunId;
///
/// let from_wire = RunId::new("run-42");
/// assert_eq!(from_wire.as_str(), "run-42");
///
/// let generated = RunId::generate();
/// assert!(!generated.as_str().is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Wrap an identifier received from the planner.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh client-side run id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
