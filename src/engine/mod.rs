//! Decision tree traversal.
//!
//! This module provides:
//! - [`TraversalEngine`]: resolves the current step and applies answers
//! - [`SessionRecorder`]: append-only history and idempotent finalization
//! - [`AnalyticsAggregator`]: summary statistics over recorded sessions
//!
//! ```text
//! caller → TraversalEngine ──lookups──→ TreeStore
//!                │
//!                ├── SessionRecorder (history, finalize)
//!                ↓
//!           SessionStore ──list──→ AnalyticsAggregator
//! ```

mod analytics;
mod recorder;
mod traversal;

pub use analytics::{AnalyticsAggregator, ConclusionCount, Summary};
pub use recorder::SessionRecorder;
pub use traversal::{Choice, ConclusionView, NextStep, Step, StepView, TraversalEngine};
