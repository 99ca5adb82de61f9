use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::SessionRecorder;
use crate::config::TreeConfig;
use crate::error::{TraversalError, TraversalResult};
use crate::storage::{
    sort_answers, AnswerTarget, HistoryEntry, Session, SessionOrigin, SessionState, SessionStore,
    TreeStore,
};

#[cfg(test)]
#[path = "traversal_tests.rs"]
mod traversal_tests;

/// A selectable answer in a [`StepView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub answer_id: i64,
    pub text: String,
}

/// A question waiting for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub session_id: String,
    pub question_id: String,
    pub text: String,
    pub category: Option<String>,
    /// Ordered by answer order, ties by answer identity.
    pub choices: Vec<Choice>,
    pub history: Vec<HistoryEntry>,
}

/// A conclusion to show instead of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConclusionView {
    pub session_id: String,
    pub conclusion: String,
    /// The sole terminal answer when the view short-circuits a one-answer
    /// question. Submitting it records the conclusion on the session.
    pub answer_id: Option<i64>,
    pub history: Vec<HistoryEntry>,
}

/// What the caller should render next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Question(StepView),
    Conclusion(ConclusionView),
}

/// Outcome of a successful answer submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextStep {
    /// The session moved to another question.
    Advance { question_id: String },
    /// The session reached a conclusion.
    Concluded { conclusion: String },
}

/// Walks sessions through the decision tree.
///
/// Holds no cached tree state: every call re-resolves questions and answers
/// against the [`TreeStore`], so edits made between two calls are observed.
#[derive(Clone)]
pub struct TraversalEngine<T, S> {
    tree: T,
    sessions: S,
    recorder: SessionRecorder,
    start_question: String,
}

impl<T: TreeStore, S: SessionStore> TraversalEngine<T, S> {
    /// Create a new traversal engine
    pub fn new(tree: T, sessions: S, config: &TreeConfig) -> Self {
        Self {
            tree,
            sessions,
            recorder: SessionRecorder::new(),
            start_question: config.start_question.clone(),
        }
    }

    /// Key of the question new sessions start at.
    #[inline]
    pub fn start_question(&self) -> &str {
        &self.start_question
    }

    /// Get a reference to the tree store.
    #[inline]
    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// Get a reference to the session store.
    #[inline]
    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    /// Start a new session at the start question.
    pub async fn start(&self, origin: SessionOrigin) -> TraversalResult<Session> {
        let session = Session::new(&self.start_question).with_origin(origin);
        self.sessions.create_session(&session).await?;

        info!(
            session_id = %session.id,
            question_id = %self.start_question,
            "Session started"
        );
        Ok(session)
    }

    /// Load a stored session by ID.
    pub async fn load(&self, session_id: &str) -> TraversalResult<Option<Session>> {
        Ok(self.sessions.get_session(session_id).await?)
    }

    /// Resolve what the session should see now.
    pub async fn current_step(&self, session: &Session) -> TraversalResult<Step> {
        let question_id = match session.state() {
            SessionState::AtQuestion(question_id) => question_id,
            SessionState::Concluded(conclusion) => {
                return Ok(Step::Conclusion(ConclusionView {
                    session_id: session.id.clone(),
                    conclusion: conclusion.to_string(),
                    answer_id: None,
                    history: session.history.clone(),
                }));
            }
            SessionState::NotStarted => {
                return Err(TraversalError::NodeNotFound {
                    question_id: String::new(),
                });
            }
        };

        let question = self.tree.get_question(question_id).await?.ok_or_else(|| {
            TraversalError::NodeNotFound {
                question_id: question_id.to_string(),
            }
        })?;

        let mut answers = self.tree.list_answers(question_id).await?;
        sort_answers(&mut answers);

        // A lone terminal answer is shown as its conclusion rather than as a
        // one-option question. Several terminal answers are still a choice.
        if let [only] = answers.as_slice() {
            if let AnswerTarget::Conclusion(conclusion) = only.target() {
                debug!(
                    session_id = %session.id,
                    question_id = %question_id,
                    answer_id = only.id,
                    "Single terminal answer, showing conclusion"
                );
                return Ok(Step::Conclusion(ConclusionView {
                    session_id: session.id.clone(),
                    conclusion: conclusion.to_string(),
                    answer_id: Some(only.id),
                    history: session.history.clone(),
                }));
            }
        }

        Ok(Step::Question(StepView {
            session_id: session.id.clone(),
            question_id: question.question_id,
            text: question.text,
            category: question.category,
            choices: answers
                .into_iter()
                .map(|a| Choice {
                    answer_id: a.id,
                    text: a.text,
                })
                .collect(),
            history: session.history.clone(),
        }))
    }

    /// Resolve the current step, recording a conclusion that is reached by
    /// the single-terminal-answer shortcut.
    ///
    /// [`current_step`](Self::current_step) only shows such a conclusion.
    /// This submits the lone answer as well, so the step lands in the history
    /// and the session is finalized as completed. `session` holds the stored
    /// state afterwards.
    pub async fn resolve_step(&self, session: &mut Session) -> TraversalResult<Step> {
        match self.current_step(session).await? {
            Step::Conclusion(ConclusionView {
                answer_id: Some(answer_id),
                ..
            }) => {
                self.submit_answer(session, answer_id).await?;
                self.current_step(session).await
            }
            step => Ok(step),
        }
    }

    /// Apply the chosen answer to the session.
    ///
    /// On success the session has been persisted and `session` holds the new
    /// state. On error neither the store nor `session` has changed.
    pub async fn submit_answer(
        &self,
        session: &mut Session,
        answer_id: i64,
    ) -> TraversalResult<NextStep> {
        let current = match session.state() {
            SessionState::AtQuestion(question_id) => question_id.to_string(),
            SessionState::Concluded(conclusion) => {
                let conclusion = conclusion.to_string();
                return self.replay_conclusion(session, answer_id, conclusion).await;
            }
            SessionState::NotStarted => {
                return Err(TraversalError::NodeNotFound {
                    question_id: String::new(),
                });
            }
        };

        let answer = self
            .tree
            .get_answer(answer_id)
            .await?
            .ok_or(TraversalError::AnswerNotFound { answer_id })?;

        if answer.question_id != current {
            debug!(
                session_id = %session.id,
                answer_id,
                expected = %current,
                actual = %answer.question_id,
                "Stale submission rejected"
            );
            return Err(TraversalError::StateMismatch {
                expected: current,
                actual: answer.question_id,
            });
        }

        let question = self
            .tree
            .get_question(&current)
            .await?
            .ok_or_else(|| TraversalError::NodeNotFound {
                question_id: current.clone(),
            })?;

        // Resolve the target before touching the session so a malformed tree
        // leaves it where it was.
        let mut next = session.clone();
        self.recorder
            .append_step(&mut next, HistoryEntry::new(&question.text, &answer.text));

        let outcome = match answer.target() {
            AnswerTarget::Next(next_question_id) => {
                if self.tree.get_question(next_question_id).await?.is_none() {
                    warn!(
                        session_id = %session.id,
                        answer_id,
                        question_id = %current,
                        next_question_id = %next_question_id,
                        "Answer points at a missing question"
                    );
                    return Err(TraversalError::Configuration {
                        reason: "dangling next pointer".to_string(),
                    });
                }
                next.current_question = Some(next_question_id.to_string());
                NextStep::Advance {
                    question_id: next_question_id.to_string(),
                }
            }
            AnswerTarget::Conclusion(conclusion) => {
                self.recorder.finalize(&mut next, conclusion);
                NextStep::Concluded {
                    conclusion: conclusion.to_string(),
                }
            }
            AnswerTarget::Missing => {
                warn!(
                    session_id = %session.id,
                    answer_id,
                    question_id = %current,
                    "Answer has neither a next question nor a conclusion"
                );
                return Err(TraversalError::Configuration {
                    reason: "answer has no next step".to_string(),
                });
            }
        };

        self.sessions.update_session(&next).await?;
        *session = next;

        match &outcome {
            NextStep::Advance { question_id } => info!(
                session_id = %session.id,
                answer_id,
                question_id = %question_id,
                steps = session.history.len(),
                "Session advanced"
            ),
            NextStep::Concluded { .. } => info!(
                session_id = %session.id,
                answer_id,
                steps = session.history.len(),
                "Session concluded"
            ),
        }

        Ok(outcome)
    }

    /// Answer a submission on a session that already concluded.
    ///
    /// The answer is still checked against the question the session
    /// concluded at. Only a terminal answer of that question is accepted, and
    /// it returns the recorded conclusion without writing anything.
    async fn replay_conclusion(
        &self,
        session: &Session,
        answer_id: i64,
        conclusion: String,
    ) -> TraversalResult<NextStep> {
        let answer = self
            .tree
            .get_answer(answer_id)
            .await?
            .ok_or(TraversalError::AnswerNotFound { answer_id })?;

        let last = session.current_question.clone().unwrap_or_default();
        if answer.question_id != last || !answer.is_terminal() {
            debug!(
                session_id = %session.id,
                answer_id,
                question_id = %answer.question_id,
                "Submission on concluded session rejected"
            );
            return Err(TraversalError::StateMismatch {
                expected: last,
                actual: answer.question_id,
            });
        }

        debug!(session_id = %session.id, answer_id, "Replayed terminal submission");
        Ok(NextStep::Concluded { conclusion })
    }

    /// Start a fresh session for the same caller. The previous session is
    /// left untouched.
    pub async fn restart(&self, session: &Session) -> TraversalResult<Session> {
        let fresh = Session::new(&self.start_question).with_origin(session.origin.clone());
        self.sessions.create_session(&fresh).await?;

        info!(
            session_id = %fresh.id,
            previous_session_id = %session.id,
            "Session restarted"
        );
        Ok(fresh)
    }
}
