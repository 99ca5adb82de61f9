use serde::Serialize;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Traversal error: {0}")]
    Traversal(#[from] TraversalError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a caller gets back to a usable state after a traversal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Re-fetch the current step and try again.
    Refetch,
    /// Abandon this traversal and start a new session.
    Restart,
}

/// Errors raised while walking the decision tree
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("Question not found: {question_id}")]
    NodeNotFound { question_id: String },

    #[error("Answer not found: {answer_id}")]
    AnswerNotFound { answer_id: i64 },

    #[error("Answer belongs to question '{actual}', session is at '{expected}'")]
    StateMismatch { expected: String, actual: String },

    #[error("Tree configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl TraversalError {
    /// Recovery hint for the caller.
    pub fn recovery(&self) -> Recovery {
        match self {
            TraversalError::AnswerNotFound { .. } | TraversalError::StateMismatch { .. } => {
                Recovery::Refetch
            }
            TraversalError::NodeNotFound { .. }
            | TraversalError::Configuration { .. }
            | TraversalError::Storage(_) => Recovery::Restart,
        }
    }
}

/// Errors raised by administrative tree operations
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Question not found: {question_id}")]
    QuestionNotFound { question_id: String },

    #[error("Answer not found: {answer_id}")]
    AnswerNotFound { answer_id: i64 },

    #[error("Question already exists: {question_id}")]
    DuplicateQuestion { question_id: String },

    #[error("Question '{question_id}' is referenced by {references} answer(s) and cannot be renamed")]
    QuestionReferenced {
        question_id: String,
        references: i64,
    },

    #[error("Invalid answer: {reason}")]
    InvalidAnswer { reason: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Import failed: {message}")]
    Import { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("{source} (recovery: {recovery:?})")]
    Traversal {
        source: TraversalError,
        recovery: Recovery,
    },

    #[error("{0}")]
    Tree(#[from] TreeError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Recovery hint for failed traversal calls.
    pub fn recovery(&self) -> Option<Recovery> {
        match self {
            McpError::Traversal { recovery, .. } => Some(*recovery),
            _ => None,
        }
    }
}

impl From<TraversalError> for McpError {
    fn from(err: TraversalError) -> Self {
        let recovery = err.recovery();
        McpError::Traversal {
            source: err,
            recovery,
        }
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for traversal operations
pub type TraversalResult<T> = Result<T, TraversalError>;

/// Result type alias for tree administration
pub type TreeResult<T> = Result<T, TreeError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
