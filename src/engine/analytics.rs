//! Summary statistics over recorded sessions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageResult;
use crate::storage::{Session, SessionStore};

/// How often a conclusion was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConclusionCount {
    pub conclusion: String,
    pub count: usize,
}

/// Aggregate view over all sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of sessions ever started.
    pub total: usize,
    /// Sessions that reached a conclusion and are not marked abandoned.
    pub completed: usize,
    /// Everything else.
    pub abandoned: usize,
    /// `completed / total`, zero when there are no sessions.
    pub completion_rate: f64,
    /// Most frequent conclusions, count descending then text ascending.
    pub top_conclusions: Vec<ConclusionCount>,
    /// Mean number of answered questions per session.
    pub avg_questions: f64,
}

/// Computes [`Summary`] values. Read-only over the sessions it is given.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsAggregator {
    top_n: usize,
}

impl AnalyticsAggregator {
    /// Create an aggregator reporting at most `top_n` conclusions
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Summarize the given sessions.
    pub fn summarize(&self, sessions: &[Session]) -> Summary {
        let total = sessions.len();
        let completed = sessions.iter().filter(|s| s.is_completed()).count();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for conclusion in sessions.iter().filter_map(|s| s.conclusion.as_deref()) {
            *counts.entry(conclusion).or_default() += 1;
        }

        // BTreeMap iterates in text order and the sort is stable, so equal
        // counts stay lexicographic.
        let mut top_conclusions: Vec<ConclusionCount> = counts
            .into_iter()
            .map(|(conclusion, count)| ConclusionCount {
                conclusion: conclusion.to_string(),
                count,
            })
            .collect();
        top_conclusions.sort_by(|a, b| b.count.cmp(&a.count));
        top_conclusions.truncate(self.top_n);

        let steps: usize = sessions.iter().map(|s| s.history.len()).sum();

        Summary {
            total,
            completed,
            abandoned: total - completed,
            completion_rate: ratio(completed, total),
            top_conclusions,
            avg_questions: ratio(steps, total),
        }
    }

    /// Load every session from the store and summarize them.
    pub async fn summarize_store<S>(&self, store: &S) -> StorageResult<Summary>
    where
        S: SessionStore + ?Sized,
    {
        let sessions = store.list_sessions().await?;
        let summary = self.summarize(&sessions);
        debug!(
            total = summary.total,
            completed = summary.completed,
            "Analytics summarized"
        );
        Ok(summary)
    }
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(crate::config::AnalyticsConfig::DEFAULT_TOP_CONCLUSIONS)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
