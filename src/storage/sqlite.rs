use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{Answer, AnswerDraft, HistoryEntry, Question, Session, SessionOrigin, SessionStore, TreeStore};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage for both the tree and the sessions
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                    message: format!("Failed to create database directory: {}", e),
                })?;
            }
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database, mainly for tests.
    ///
    /// Uses a single long-lived connection: every SQLite in-memory connection
    /// is its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TreeStore for SqliteStorage {
    async fn get_question(&self, question_id: &str) -> StorageResult<Option<Question>> {
        let row: Option<QuestionRow> = sqlx::query_as(
            r#"
            SELECT question_id, text, category, created_at
            FROM questions
            WHERE question_id = ?
            "#,
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_answer(&self, answer_id: i64) -> StorageResult<Option<Answer>> {
        let row: Option<AnswerRow> = sqlx::query_as(
            r#"
            SELECT id, question_id, text, next_question_id, conclusion, sort_order, created_at
            FROM answers
            WHERE id = ?
            "#,
        )
        .bind(answer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_answers(&self, question_id: &str) -> StorageResult<Vec<Answer>> {
        let rows: Vec<AnswerRow> = sqlx::query_as(
            r#"
            SELECT id, question_id, text, next_question_id, conclusion, sort_order, created_at
            FROM answers
            WHERE question_id = ?
            ORDER BY sort_order ASC, id ASC
            "#,
        )
        .bind(question_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_questions(&self) -> StorageResult<Vec<Question>> {
        let rows: Vec<QuestionRow> = sqlx::query_as(
            r#"
            SELECT question_id, text, category, created_at
            FROM questions
            ORDER BY question_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_all_answers(&self) -> StorageResult<Vec<Answer>> {
        let rows: Vec<AnswerRow> = sqlx::query_as(
            r#"
            SELECT id, question_id, text, next_question_id, conclusion, sort_order, created_at
            FROM answers
            ORDER BY question_id ASC, sort_order ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn count_references(&self, question_id: &str) -> StorageResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE next_question_id = ?")
                .bind(question_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn create_question(&self, question: &Question) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO questions (question_id, text, category, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&question.question_id)
        .bind(&question.text)
        .bind(&question.category)
        .bind(question.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_question(&self, question: &Question) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE questions
            SET text = ?, category = ?
            WHERE question_id = ?
            "#,
        )
        .bind(&question.text)
        .bind(&question.category)
        .bind(&question.question_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn rename_question(
        &self,
        question_id: &str,
        new_question_id: &str,
    ) -> StorageResult<bool> {
        // The reference check and the rename are one statement so a concurrent
        // edit cannot add a pointer in between. Owned answers follow through
        // ON UPDATE CASCADE.
        let result = sqlx::query(
            r#"
            UPDATE questions
            SET question_id = ?
            WHERE question_id = ?
              AND NOT EXISTS (SELECT 1 FROM answers WHERE next_question_id = ?)
            "#,
        )
        .bind(new_question_id)
        .bind(question_id)
        .bind(question_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_question(&self, question_id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM questions WHERE question_id = ?")
            .bind(question_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_answer(&self, draft: &AnswerDraft) -> StorageResult<Answer> {
        let mut tx = self.pool.begin().await?;

        let order = match draft.order {
            Some(order) => order,
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM answers WHERE question_id = ?",
                )
                .bind(&draft.question_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO answers (question_id, text, next_question_id, conclusion, sort_order, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&draft.question_id)
        .bind(&draft.text)
        .bind(&draft.next_question_id)
        .bind(&draft.conclusion)
        .bind(order)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Answer {
            id: result.last_insert_rowid(),
            question_id: draft.question_id.clone(),
            text: draft.text.clone(),
            next_question_id: draft.next_question_id.clone(),
            conclusion: draft.conclusion.clone(),
            order,
            created_at,
        })
    }

    async fn update_answer(&self, answer: &Answer) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE answers
            SET text = ?, next_question_id = ?, conclusion = ?, sort_order = ?
            WHERE id = ?
            "#,
        )
        .bind(&answer.text)
        .bind(&answer.next_question_id)
        .bind(&answer.conclusion)
        .bind(answer.order)
        .bind(answer.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_answer(&self, answer_id: i64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM answers WHERE id = ?")
            .bind(answer_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reorder_answers(&self, question_id: &str, ordered_ids: &[i64]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for (index, answer_id) in ordered_ids.iter().enumerate() {
            let result = sqlx::query(
                "UPDATE answers SET sort_order = ? WHERE id = ? AND question_id = ?",
            )
            .bind(index as i64 + 1)
            .bind(*answer_id)
            .bind(question_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back the partial reorder.
                return Err(StorageError::Query {
                    message: format!(
                        "Answer {} does not belong to question {}",
                        answer_id, question_id
                    ),
                });
            }
        }

        tx.commit().await?;
        debug!(question_id = %question_id, count = ordered_ids.len(), "Answers reordered");
        Ok(())
    }

    async fn import_tree(
        &self,
        questions: &[Question],
        answers: &[AnswerDraft],
        clear_existing: bool,
    ) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;

        if clear_existing {
            sqlx::query("DELETE FROM answers").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM questions").execute(&mut *tx).await?;
        }

        for question in questions {
            sqlx::query(
                r#"
                INSERT INTO questions (question_id, text, category, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&question.question_id)
            .bind(&question.text)
            .bind(&question.category)
            .bind(question.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        let created_at = Utc::now().to_rfc3339();
        for draft in answers {
            sqlx::query(
                r#"
                INSERT INTO answers (question_id, text, next_question_id, conclusion, sort_order, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&draft.question_id)
            .bind(&draft.text)
            .bind(&draft.next_question_id)
            .bind(&draft.conclusion)
            .bind(draft.order.unwrap_or(0))
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(answers.len())
    }
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        let history = encode_history(&session.history)?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, current_question, history, started_at, completed_at,
                                  conclusion, client_address, user_agent, abandoned)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.current_question)
        .bind(&history)
        .bind(session.started_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(&session.conclusion)
        .bind(&session.origin.client_address)
        .bind(&session.origin.user_agent)
        .bind(session.abandoned)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, current_question, history, started_at, completed_at,
                   conclusion, client_address, user_agent, abandoned
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_session(&self, session: &Session) -> StorageResult<()> {
        let history = encode_history(&session.history)?;

        // Position, history and completion are written together.
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET current_question = ?, history = ?, completed_at = ?, conclusion = ?,
                client_address = ?, user_agent = ?, abandoned = ?
            WHERE id = ?
            "#,
        )
        .bind(&session.current_question)
        .bind(&history)
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(&session.conclusion)
        .bind(&session.origin.client_address)
        .bind(&session.origin.user_agent)
        .bind(session.abandoned)
        .bind(&session.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: session.id.clone(),
            });
        }

        Ok(())
    }

    async fn list_sessions(&self) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, current_question, history, started_at, completed_at,
                   conclusion, client_address, user_agent, abandoned
            FROM sessions
            ORDER BY started_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct QuestionRow {
    question_id: String,
    text: String,
    category: Option<String>,
    created_at: String,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            question_id: row.question_id,
            text: row.text,
            category: row.category,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct AnswerRow {
    id: i64,
    question_id: String,
    text: String,
    next_question_id: Option<String>,
    conclusion: Option<String>,
    sort_order: i64,
    created_at: String,
}

impl From<AnswerRow> for Answer {
    fn from(row: AnswerRow) -> Self {
        Self {
            id: row.id,
            question_id: row.question_id,
            text: row.text,
            next_question_id: row.next_question_id,
            conclusion: row.conclusion,
            order: row.sort_order,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

/// Session history as stored in the `history` column.
fn encode_history(history: &[HistoryEntry]) -> StorageResult<String> {
    Ok(serde_json::to_string(history)?)
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    current_question: Option<String>,
    history: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    conclusion: Option<String>,
    client_address: Option<String>,
    user_agent: Option<String>,
    abandoned: bool,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        let history: Vec<HistoryEntry> = row
            .history
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Self {
            id: row.id,
            current_question: row.current_question,
            history,
            started_at: parse_timestamp(&row.started_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            conclusion: row.conclusion,
            origin: SessionOrigin {
                client_address: row.client_address,
                user_agent: row.user_agent,
            },
            abandoned: row.abandoned,
        }
    }
}
