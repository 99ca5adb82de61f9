//! Administrative operations on the decision tree.
//!
//! Callers are expected to have authorized the request before reaching
//! these operations; there is no permission model here.

mod import;
mod validate;


pub use import::{AnswerDocument, ImportReport, QuestionDocument, TreeDocument};
pub use validate::{validate, Issue, Severity, ValidationReport};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{TreeError, TreeResult};
use crate::storage::{sort_answers, Answer, AnswerDraft, Question, TreeStore};

/// A question together with its ordered answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionNode {
    #[serde(flatten)]
    pub question: Question,
    pub answers: Vec<Answer>,
}

/// Fields to change on a question. `None` leaves a field as it is; an empty
/// category clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionUpdate {
    pub text: Option<String>,
    pub category: Option<String>,
}

/// Fields to change on an answer. Setting either target replaces both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerUpdate {
    pub text: Option<String>,
    pub next_question_id: Option<String>,
    pub conclusion: Option<String>,
}

/// Direction for [`TreeEditor::move_answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Create, edit, delete and reorder questions and answers.
#[derive(Clone)]
pub struct TreeEditor<T> {
    store: T,
}

impl<T: TreeStore> TreeEditor<T> {
    /// Create a new editor over the given store
    pub fn new(store: T) -> Self {
        Self { store }
    }

    /// Get a reference to the tree store.
    #[inline]
    pub fn store(&self) -> &T {
        &self.store
    }

    /// Add a new question.
    pub async fn add_question(
        &self,
        question_id: &str,
        text: &str,
        category: Option<&str>,
    ) -> TreeResult<Question> {
        require_non_empty("question_id", question_id)?;
        require_non_empty("text", text)?;

        if self.store.get_question(question_id).await?.is_some() {
            return Err(TreeError::DuplicateQuestion {
                question_id: question_id.to_string(),
            });
        }

        let mut question = Question::new(question_id, text);
        question.category = category.filter(|c| !c.is_empty()).map(str::to_string);
        self.store.create_question(&question).await?;

        info!(question_id = %question_id, "Question added");
        Ok(question)
    }

    /// Change a question's text or category.
    pub async fn edit_question(
        &self,
        question_id: &str,
        update: QuestionUpdate,
    ) -> TreeResult<Question> {
        let mut question = self.require_question(question_id).await?;

        if let Some(text) = update.text {
            require_non_empty("text", &text)?;
            question.text = text;
        }
        if let Some(category) = update.category {
            question.category = Some(category).filter(|c| !c.is_empty());
        }

        if !self.store.update_question(&question).await? {
            return Err(TreeError::QuestionNotFound {
                question_id: question_id.to_string(),
            });
        }

        info!(question_id = %question_id, "Question edited");
        Ok(question)
    }

    /// Change a question's key. Refused while any answer points at it.
    pub async fn rename_question(&self, question_id: &str, new_question_id: &str) -> TreeResult<()> {
        require_non_empty("new_question_id", new_question_id)?;
        self.require_question(question_id).await?;

        if question_id == new_question_id {
            return Ok(());
        }
        if self.store.get_question(new_question_id).await?.is_some() {
            return Err(TreeError::DuplicateQuestion {
                question_id: new_question_id.to_string(),
            });
        }

        if !self.store.rename_question(question_id, new_question_id).await? {
            let references = self.store.count_references(question_id).await?;
            if references > 0 {
                return Err(TreeError::QuestionReferenced {
                    question_id: question_id.to_string(),
                    references,
                });
            }
            return Err(TreeError::QuestionNotFound {
                question_id: question_id.to_string(),
            });
        }

        info!(question_id = %question_id, new_question_id = %new_question_id, "Question renamed");
        Ok(())
    }

    /// Edit a question and optionally change its key in one call.
    ///
    /// Inputs are checked and the rename runs before any field is written,
    /// so a refused rename leaves the question as it was.
    pub async fn update_question(
        &self,
        question_id: &str,
        update: QuestionUpdate,
        new_question_id: Option<&str>,
    ) -> TreeResult<Question> {
        if let Some(text) = &update.text {
            require_non_empty("text", text)?;
        }

        let key = match new_question_id {
            Some(new_question_id) => {
                self.rename_question(question_id, new_question_id).await?;
                new_question_id
            }
            None => question_id,
        };
        self.edit_question(key, update).await
    }

    /// Delete a question and its answers. Answers elsewhere that point at it
    /// are left dangling.
    pub async fn delete_question(&self, question_id: &str) -> TreeResult<()> {
        let references = self.store.count_references(question_id).await?;
        if !self.store.delete_question(question_id).await? {
            return Err(TreeError::QuestionNotFound {
                question_id: question_id.to_string(),
            });
        }

        if references > 0 {
            tracing::warn!(
                question_id = %question_id,
                references,
                "Deleted question is still the target of other answers"
            );
        }
        info!(question_id = %question_id, "Question deleted");
        Ok(())
    }

    /// Add an answer to an existing question.
    pub async fn add_answer(&self, draft: AnswerDraft) -> TreeResult<Answer> {
        require_non_empty("text", &draft.text)?;
        check_targets(draft.next_question_id.as_deref(), draft.conclusion.as_deref())?;
        self.require_question(&draft.question_id).await?;

        let answer = self.store.create_answer(&draft).await?;
        info!(
            question_id = %answer.question_id,
            answer_id = answer.id,
            order = answer.order,
            "Answer added"
        );
        Ok(answer)
    }

    /// Change an answer's text or target.
    pub async fn edit_answer(&self, answer_id: i64, update: AnswerUpdate) -> TreeResult<Answer> {
        let mut answer = self.require_answer(answer_id).await?;

        if let Some(text) = update.text {
            require_non_empty("text", &text)?;
            answer.text = text;
        }
        if update.next_question_id.is_some() || update.conclusion.is_some() {
            check_targets(update.next_question_id.as_deref(), update.conclusion.as_deref())?;
            answer.next_question_id = update.next_question_id.filter(|n| !n.is_empty());
            answer.conclusion = update.conclusion.filter(|c| !c.is_empty());
        }

        if !self.store.update_answer(&answer).await? {
            return Err(TreeError::AnswerNotFound { answer_id });
        }

        info!(answer_id, "Answer edited");
        Ok(answer)
    }

    /// Delete an answer.
    pub async fn delete_answer(&self, answer_id: i64) -> TreeResult<()> {
        if !self.store.delete_answer(answer_id).await? {
            return Err(TreeError::AnswerNotFound { answer_id });
        }
        info!(answer_id, "Answer deleted");
        Ok(())
    }

    /// Swap an answer with its neighbour above. Returns `false` if it is
    /// already first.
    pub async fn move_up(&self, answer_id: i64) -> TreeResult<bool> {
        self.move_answer(answer_id, MoveDirection::Up).await
    }

    /// Swap an answer with its neighbour below. Returns `false` if it is
    /// already last.
    pub async fn move_down(&self, answer_id: i64) -> TreeResult<bool> {
        self.move_answer(answer_id, MoveDirection::Down).await
    }

    /// Swap an answer with its neighbour by index, then store dense orders.
    pub async fn move_answer(&self, answer_id: i64, direction: MoveDirection) -> TreeResult<bool> {
        let answer = self.require_answer(answer_id).await?;
        let mut siblings = self.store.list_answers(&answer.question_id).await?;
        sort_answers(&mut siblings);

        let index = siblings
            .iter()
            .position(|a| a.id == answer_id)
            .ok_or(TreeError::AnswerNotFound { answer_id })?;

        let neighbour = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < siblings.len() => index + 1,
            _ => return Ok(false),
        };

        siblings.swap(index, neighbour);
        let ordered: Vec<i64> = siblings.iter().map(|a| a.id).collect();
        self.store
            .reorder_answers(&answer.question_id, &ordered)
            .await?;

        info!(answer_id, direction = ?direction, "Answer moved");
        Ok(true)
    }

    /// Every question with its ordered answers, sorted by key.
    pub async fn list_tree(&self) -> TreeResult<Vec<QuestionNode>> {
        let questions = self.store.list_questions().await?;
        let mut nodes = Vec::with_capacity(questions.len());
        for question in questions {
            let mut answers = self.store.list_answers(&question.question_id).await?;
            sort_answers(&mut answers);
            nodes.push(QuestionNode { question, answers });
        }
        Ok(nodes)
    }

    /// Check the stored tree for problems.
    pub async fn validate(&self, start_question: &str) -> TreeResult<ValidationReport> {
        let questions = self.store.list_questions().await?;
        let answers = self.store.list_all_answers().await?;
        Ok(validate(&questions, &answers, start_question))
    }

    /// Store a whole tree document in one transaction.
    pub async fn import(&self, document: TreeDocument, replace: bool) -> TreeResult<ImportReport> {
        let (questions, answers) = document.into_records()?;

        if !replace {
            for question in &questions {
                if self.store.get_question(&question.question_id).await?.is_some() {
                    return Err(TreeError::DuplicateQuestion {
                        question_id: question.question_id.clone(),
                    });
                }
            }
        }

        let answer_count = self.store.import_tree(&questions, &answers, replace).await?;
        let report = ImportReport {
            questions: questions.len(),
            answers: answer_count,
        };

        info!(
            questions = report.questions,
            answers = report.answers,
            replace,
            "Tree imported"
        );
        Ok(report)
    }

    async fn require_question(&self, question_id: &str) -> TreeResult<Question> {
        self.store
            .get_question(question_id)
            .await?
            .ok_or_else(|| TreeError::QuestionNotFound {
                question_id: question_id.to_string(),
            })
    }

    async fn require_answer(&self, answer_id: i64) -> TreeResult<Answer> {
        self.store
            .get_answer(answer_id)
            .await?
            .ok_or(TreeError::AnswerNotFound { answer_id })
    }
}

fn require_non_empty(field: &str, value: &str) -> TreeResult<()> {
    if value.trim().is_empty() {
        return Err(TreeError::Validation {
            field: field.to_string(),
            reason: "cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Both targets at once is rejected; neither is allowed and caught at
/// traversal time.
fn check_targets(next_question_id: Option<&str>, conclusion: Option<&str>) -> TreeResult<()> {
    let has_next = next_question_id.is_some_and(|n| !n.is_empty());
    let has_conclusion = conclusion.is_some_and(|c| !c.is_empty());
    if has_next && has_conclusion {
        return Err(TreeError::InvalidAnswer {
            reason: "an answer leads to a next question or a conclusion, not both".to_string(),
        });
    }
    Ok(())
}
