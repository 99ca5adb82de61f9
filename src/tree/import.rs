//! Tree documents: a whole decision tree as one JSON value.
//!
//! ```json
//! {
//!   "questions": {
//!     "start": {
//!       "text": "Is it plugged in?",
//!       "answers": [
//!         { "text": "Yes", "next": "check_power" },
//!         { "text": "No", "conclusion": "Plug it in." }
//!       ]
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};
use crate::storage::{AnswerDraft, Question};

/// A decision tree keyed by question id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    #[serde(default)]
    pub questions: BTreeMap<String, QuestionDocument>,
}

/// One question in a [`TreeDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDocument {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Answers in display order.
    #[serde(default)]
    pub answers: Vec<AnswerDocument>,
}

/// One answer in a [`QuestionDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerDocument {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

/// Counts of what an import stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub questions: usize,
    pub answers: usize,
}

impl TreeDocument {
    /// Parse a document from JSON text
    pub fn from_json_str(json: &str) -> TreeResult<Self> {
        serde_json::from_str(json).map_err(|e| TreeError::Import {
            message: format!("Invalid tree document: {}", e),
        })
    }

    /// Read and parse a document from a file
    pub async fn from_path(path: &Path) -> TreeResult<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TreeError::Import {
                message: format!("Failed to read {}: {}", path.display(), e),
            })?;
        Self::from_json_str(&json)
    }

    /// Split into store records. Answer order is position + 1 within each
    /// question.
    pub fn into_records(self) -> TreeResult<(Vec<Question>, Vec<AnswerDraft>)> {
        let mut questions = Vec::with_capacity(self.questions.len());
        let mut answers = Vec::new();

        for (question_id, doc) in self.questions {
            if question_id.trim().is_empty() {
                return Err(TreeError::Import {
                    message: "Question key cannot be empty".to_string(),
                });
            }
            if doc.text.trim().is_empty() {
                return Err(TreeError::Import {
                    message: format!("Question '{}' has no text", question_id),
                });
            }

            for (index, answer) in doc.answers.into_iter().enumerate() {
                let next = answer.next.filter(|n| !n.is_empty());
                let conclusion = answer.conclusion.filter(|c| !c.is_empty());
                if next.is_some() && conclusion.is_some() {
                    return Err(TreeError::InvalidAnswer {
                        reason: format!(
                            "answer {} of '{}' has both a next question and a conclusion",
                            index + 1,
                            question_id
                        ),
                    });
                }
                answers.push(AnswerDraft {
                    question_id: question_id.clone(),
                    text: answer.text,
                    next_question_id: next,
                    conclusion,
                    order: Some(index as i64 + 1),
                });
            }

            let mut question = Question::new(question_id, doc.text);
            question.category = doc.category.filter(|c| !c.is_empty());
            questions.push(question);
        }

        Ok((questions, answers))
    }
}
