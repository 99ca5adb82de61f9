//! Storage layer for the decision tree and traversal sessions.
//!
//! The tree is a flat set of [`Question`] nodes keyed by their string id,
//! each owning an ordered list of [`Answer`] edges. Answers point at other
//! questions by key only, so a pointer can dangle after a delete. Sessions
//! refer to the tree the same way.

mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// A question node in the decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Caller-assigned key, unique across the tree.
    pub question_id: String,
    /// Text shown to the user.
    pub text: String,
    /// Optional grouping label.
    pub category: Option<String>,
    /// When the question was created.
    pub created_at: DateTime<Utc>,
}

/// An answer edge owned by exactly one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Store-assigned identity.
    pub id: i64,
    /// Key of the owning question.
    pub question_id: String,
    /// Text shown to the user.
    pub text: String,
    /// Key of the question this answer leads to.
    pub next_question_id: Option<String>,
    /// Terminal conclusion text.
    pub conclusion: Option<String>,
    /// Display order within the owning question. Only relative order matters.
    pub order: i64,
    /// When the answer was created.
    pub created_at: DateTime<Utc>,
}

/// Where an answer leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerTarget<'a> {
    /// Another question, by key.
    Next(&'a str),
    /// A terminal conclusion.
    Conclusion(&'a str),
    /// Neither target is set; the tree is misconfigured.
    Missing,
}

/// An answer that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerDraft {
    /// Key of the owning question.
    pub question_id: String,
    /// Text shown to the user.
    pub text: String,
    /// Key of the question this answer leads to.
    pub next_question_id: Option<String>,
    /// Terminal conclusion text.
    pub conclusion: Option<String>,
    /// Explicit order; the store appends after the current maximum when unset.
    pub order: Option<i64>,
}

/// One traversed step, captured as text at the time of traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Question text as it read when answered.
    pub question: String,
    /// Answer text as it read when chosen.
    pub answer: String,
}

/// Where a session came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOrigin {
    /// Caller network address.
    pub client_address: Option<String>,
    /// Client identifier string (e.g. a user agent).
    pub user_agent: Option<String>,
}

/// One user's traversal of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Key of the question the session is at; `None` before the session starts.
    pub current_question: Option<String>,
    /// Ordered, append-only path taken so far.
    pub history: Vec<HistoryEntry>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When a conclusion was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// The conclusion reached, if any.
    pub conclusion: Option<String>,
    /// Origin metadata.
    #[serde(flatten)]
    pub origin: SessionOrigin,
    /// Cleared when the session is finalized with a conclusion.
    pub abandoned: bool,
}

/// Position of a session in the traversal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState<'a> {
    /// No current question.
    NotStarted,
    /// Waiting for an answer to the given question.
    AtQuestion(&'a str),
    /// A conclusion was reached; only a restart leaves this state.
    Concluded(&'a str),
}

impl Question {
    /// Create a new question
    pub fn new(question_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            text: text.into(),
            category: None,
            created_at: Utc::now(),
        }
    }

    /// Set the category label
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

impl Answer {
    /// Resolve where this answer leads. A next pointer wins over a conclusion.
    pub fn target(&self) -> AnswerTarget<'_> {
        match (&self.next_question_id, &self.conclusion) {
            (Some(next), _) => AnswerTarget::Next(next.as_str()),
            (None, Some(conclusion)) => AnswerTarget::Conclusion(conclusion.as_str()),
            (None, None) => AnswerTarget::Missing,
        }
    }

    /// Whether choosing this answer ends the traversal.
    pub fn is_terminal(&self) -> bool {
        matches!(self.target(), AnswerTarget::Conclusion(_))
    }
}

/// Sort answers for display: `order` ascending, ties broken by identity.
pub fn sort_answers(answers: &mut [Answer]) {
    answers.sort_by_key(|a| (a.order, a.id));
}

impl AnswerDraft {
    /// Create a new draft with no target
    pub fn new(question_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            text: text.into(),
            next_question_id: None,
            conclusion: None,
            order: None,
        }
    }

    /// Lead to another question
    pub fn leading_to(mut self, next_question_id: impl Into<String>) -> Self {
        self.next_question_id = Some(next_question_id.into());
        self
    }

    /// End the traversal with a conclusion
    pub fn concluding(mut self, conclusion: impl Into<String>) -> Self {
        self.conclusion = Some(conclusion.into());
        self
    }

    /// Set an explicit display order
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }
}

impl HistoryEntry {
    /// Create a new history entry
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

impl SessionOrigin {
    /// Create an origin from caller metadata
    pub fn new(client_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            client_address,
            user_agent,
        }
    }
}

impl Session {
    /// Create a new session positioned at the given start question
    pub fn new(start_question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            current_question: Some(start_question.into()),
            history: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            conclusion: None,
            origin: SessionOrigin::default(),
            abandoned: true,
        }
    }

    /// Attach origin metadata
    pub fn with_origin(mut self, origin: SessionOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Current position in the traversal state machine.
    pub fn state(&self) -> SessionState<'_> {
        if self.completed_at.is_some() {
            return SessionState::Concluded(self.conclusion.as_deref().unwrap_or_default());
        }
        match &self.current_question {
            Some(question_id) => SessionState::AtQuestion(question_id.as_str()),
            None => SessionState::NotStarted,
        }
    }

    /// Whether the session reached a conclusion and was not marked abandoned.
    pub fn is_completed(&self) -> bool {
        !self.abandoned && self.completed_at.is_some()
    }
}

/// Read and write access to the decision tree.
///
/// Every traversal lookup goes through this trait so that concurrent
/// administrative edits are always observed.
#[async_trait]
pub trait TreeStore: Send + Sync {
    // Lookups used by traversal

    /// Get a question by key.
    async fn get_question(&self, question_id: &str) -> StorageResult<Option<Question>>;
    /// Get an answer by identity.
    async fn get_answer(&self, answer_id: i64) -> StorageResult<Option<Answer>>;
    /// Get the answers owned by a question, ordered by `order` then identity.
    async fn list_answers(&self, question_id: &str) -> StorageResult<Vec<Answer>>;

    // Whole-tree reads

    /// Get all questions, ordered by key.
    async fn list_questions(&self) -> StorageResult<Vec<Question>>;
    /// Get every answer in the tree.
    async fn list_all_answers(&self) -> StorageResult<Vec<Answer>>;
    /// Count answers whose next pointer targets the question.
    async fn count_references(&self, question_id: &str) -> StorageResult<i64>;

    // Mutations

    /// Create a new question.
    async fn create_question(&self, question: &Question) -> StorageResult<()>;
    /// Update text and category. Returns `false` if the question does not exist.
    async fn update_question(&self, question: &Question) -> StorageResult<bool>;
    /// Change a question key unless some answer still points at it.
    /// Returns `false` if nothing was renamed.
    async fn rename_question(&self, question_id: &str, new_question_id: &str)
        -> StorageResult<bool>;
    /// Delete a question and its answers. Returns `false` if it did not exist.
    async fn delete_question(&self, question_id: &str) -> StorageResult<bool>;
    /// Store a new answer and return it with its assigned identity and order.
    async fn create_answer(&self, draft: &AnswerDraft) -> StorageResult<Answer>;
    /// Update an answer's text, targets and order. Returns `false` if it does not exist.
    async fn update_answer(&self, answer: &Answer) -> StorageResult<bool>;
    /// Delete an answer. Returns `false` if it did not exist.
    async fn delete_answer(&self, answer_id: i64) -> StorageResult<bool>;
    /// Rewrite a question's answer orders as `1..=n` following `ordered_ids`, atomically.
    async fn reorder_answers(&self, question_id: &str, ordered_ids: &[i64]) -> StorageResult<()>;
    /// Insert a whole tree in one transaction, optionally clearing the existing one.
    /// Returns the number of answers stored.
    async fn import_tree(
        &self,
        questions: &[Question],
        answers: &[AnswerDraft],
        clear_existing: bool,
    ) -> StorageResult<usize>;
}

/// Persistence for traversal sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session.
    async fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Replace a stored session in a single write.
    async fn update_session(&self, session: &Session) -> StorageResult<()>;
    /// Get every session, oldest first.
    async fn list_sessions(&self) -> StorageResult<Vec<Session>>;
}
