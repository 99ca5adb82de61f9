//! Session history recording and finalization.

use chrono::Utc;
use tracing::debug;

use crate::storage::{HistoryEntry, Session};

/// Appends traversal steps to a session and finalizes it on a conclusion.
///
/// The recorder only mutates the in-memory [`Session`]; the engine persists
/// the result in a single store write.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionRecorder;

impl SessionRecorder {
    /// Create a new recorder
    pub fn new() -> Self {
        Self
    }

    /// Append a step to the session history. Never removes or reorders
    /// earlier entries and does not deduplicate replays.
    pub fn append_step(&self, session: &mut Session, entry: HistoryEntry) {
        session.history.push(entry);
        debug!(
            session_id = %session.id,
            steps = session.history.len(),
            "Step recorded"
        );
    }

    /// Mark the session completed with the given conclusion.
    ///
    /// Returns `false` without touching the session if it was already
    /// finalized.
    pub fn finalize(&self, session: &mut Session, conclusion: &str) -> bool {
        if session.completed_at.is_some() {
            debug!(session_id = %session.id, "Session already finalized");
            return false;
        }

        session.completed_at = Some(Utc::now());
        session.abandoned = false;
        session.conclusion = Some(conclusion.to_string());
        debug!(
            session_id = %session.id,
            steps = session.history.len(),
            "Session finalized"
        );
        true
    }
}
