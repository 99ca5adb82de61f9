use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::engine::{NextStep, Step};
use crate::error::{McpError, McpResult, StorageError, TraversalError};
use crate::storage::{AnswerDraft, Session, SessionOrigin};
use crate::tree::{AnswerUpdate, MoveDirection, QuestionUpdate, TreeDocument};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Traversal
        "session_start" => handle_session_start(state, arguments).await,
        "session_current_step" => handle_session_current_step(state, arguments).await,
        "session_submit_answer" => handle_session_submit_answer(state, arguments).await,
        "session_restart" => handle_session_restart(state, arguments).await,
        // Analytics
        "analytics_summary" => handle_analytics_summary(state).await,
        // Tree administration
        "tree_list" => handle_tree_list(state).await,
        "tree_add_question" => handle_tree_add_question(state, arguments).await,
        "tree_edit_question" => handle_tree_edit_question(state, arguments).await,
        "tree_delete_question" => handle_tree_delete_question(state, arguments).await,
        "tree_add_answer" => handle_tree_add_answer(state, arguments).await,
        "tree_edit_answer" => handle_tree_edit_answer(state, arguments).await,
        "tree_delete_answer" => handle_tree_delete_answer(state, arguments).await,
        "tree_move_answer" => handle_tree_move_answer(state, arguments).await,
        "tree_validate" => handle_tree_validate(state).await,
        "tree_import" => handle_tree_import(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Traversal handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SubmitAnswerParams {
    session_id: String,
    answer_id: i64,
}

/// A session together with what it should show next.
#[derive(Debug, Serialize)]
struct SessionStep {
    session_id: String,
    step: Step,
}

#[derive(Debug, Serialize)]
struct SubmitResult {
    session_id: String,
    #[serde(flatten)]
    outcome: NextStep,
    step: Step,
}

/// Handle session_start tool call
async fn handle_session_start(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    // Origin metadata is optional, so no arguments at all is fine.
    let origin: SessionOrigin = match arguments {
        Some(_) => parse_arguments("session_start", arguments)?,
        None => SessionOrigin::default(),
    };

    let mut session = state.engine.start(origin).await?;
    let step = state.engine.resolve_step(&mut session).await?;

    to_value(SessionStep {
        session_id: session.id,
        step,
    })
}

/// Handle session_current_step tool call
async fn handle_session_current_step(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: SessionParams = parse_arguments("session_current_step", arguments)?;
    let mut session = load_session(state, &params.session_id).await?;
    let step = state.engine.resolve_step(&mut session).await?;

    to_value(SessionStep {
        session_id: session.id,
        step,
    })
}

/// Handle session_submit_answer tool call
async fn handle_session_submit_answer(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: SubmitAnswerParams = parse_arguments("session_submit_answer", arguments)?;
    let mut session = load_session(state, &params.session_id).await?;

    let outcome = state
        .engine
        .submit_answer(&mut session, params.answer_id)
        .await?;
    let step = state.engine.resolve_step(&mut session).await?;

    to_value(SubmitResult {
        session_id: session.id,
        outcome,
        step,
    })
}

/// Handle session_restart tool call
async fn handle_session_restart(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: SessionParams = parse_arguments("session_restart", arguments)?;
    let previous = load_session(state, &params.session_id).await?;

    let mut session = state.engine.restart(&previous).await?;
    let step = state.engine.resolve_step(&mut session).await?;

    to_value(SessionStep {
        session_id: session.id,
        step,
    })
}

/// Handle analytics_summary tool call
async fn handle_analytics_summary(state: &SharedState) -> McpResult<Value> {
    let summary = state
        .analytics
        .summarize_store(state.engine.sessions())
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    to_value(summary)
}

/// Load a session, treating an unknown ID like any other dead end: start over.
async fn load_session(state: &SharedState, session_id: &str) -> McpResult<Session> {
    let session = state.engine.load(session_id).await?;
    session.ok_or_else(|| {
        TraversalError::from(StorageError::SessionNotFound {
            session_id: session_id.to_string(),
        })
        .into()
    })
}

// ============================================================================
// Tree administration handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct AddQuestionParams {
    question_id: String,
    text: String,
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EditQuestionParams {
    question_id: String,
    text: Option<String>,
    category: Option<String>,
    new_question_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionParams {
    question_id: String,
}

#[derive(Debug, Deserialize)]
struct AnswerParams {
    answer_id: i64,
}

#[derive(Debug, Deserialize)]
struct EditAnswerParams {
    answer_id: i64,
    #[serde(flatten)]
    update: AnswerUpdate,
}

#[derive(Debug, Deserialize)]
struct MoveAnswerParams {
    answer_id: i64,
    direction: MoveDirection,
}

#[derive(Debug, Deserialize)]
struct ImportParams {
    document: TreeDocument,
    #[serde(default)]
    replace: bool,
}

/// Handle tree_list tool call
async fn handle_tree_list(state: &SharedState) -> McpResult<Value> {
    let tree = state.editor.list_tree().await?;
    to_value(serde_json::json!({ "questions": tree }))
}

/// Handle tree_add_question tool call
async fn handle_tree_add_question(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: AddQuestionParams = parse_arguments("tree_add_question", arguments)?;
    let question = state
        .editor
        .add_question(&params.question_id, &params.text, params.category.as_deref())
        .await?;
    to_value(question)
}

/// Handle tree_edit_question tool call
async fn handle_tree_edit_question(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: EditQuestionParams = parse_arguments("tree_edit_question", arguments)?;

    let question = state
        .editor
        .update_question(
            &params.question_id,
            QuestionUpdate {
                text: params.text,
                category: params.category,
            },
            params.new_question_id.as_deref(),
        )
        .await?;

    to_value(question)
}

/// Handle tree_delete_question tool call
async fn handle_tree_delete_question(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: QuestionParams = parse_arguments("tree_delete_question", arguments)?;
    state.editor.delete_question(&params.question_id).await?;
    to_value(serde_json::json!({ "deleted": params.question_id }))
}

/// Handle tree_add_answer tool call
async fn handle_tree_add_answer(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let draft: AnswerDraft = parse_arguments("tree_add_answer", arguments)?;
    let answer = state.editor.add_answer(draft).await?;
    to_value(answer)
}

/// Handle tree_edit_answer tool call
async fn handle_tree_edit_answer(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: EditAnswerParams = parse_arguments("tree_edit_answer", arguments)?;
    let answer = state
        .editor
        .edit_answer(params.answer_id, params.update)
        .await?;
    to_value(answer)
}

/// Handle tree_delete_answer tool call
async fn handle_tree_delete_answer(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: AnswerParams = parse_arguments("tree_delete_answer", arguments)?;
    state.editor.delete_answer(params.answer_id).await?;
    to_value(serde_json::json!({ "deleted": params.answer_id }))
}

/// Handle tree_move_answer tool call
async fn handle_tree_move_answer(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: MoveAnswerParams = parse_arguments("tree_move_answer", arguments)?;
    let moved = state
        .editor
        .move_answer(params.answer_id, params.direction)
        .await?;
    to_value(serde_json::json!({ "answer_id": params.answer_id, "moved": moved }))
}

/// Handle tree_validate tool call
async fn handle_tree_validate(state: &SharedState) -> McpResult<Value> {
    let report = state
        .editor
        .validate(state.engine.start_question())
        .await?;
    to_value(serde_json::json!({
        "valid": report.is_valid(),
        "report": report,
    }))
}

/// Handle tree_import tool call
async fn handle_tree_import(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ImportParams = parse_arguments("tree_import", arguments)?;
    let report = state.editor.import(params.document, params.replace).await?;
    to_value(report)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

fn to_value<R: Serialize>(result: R) -> McpResult<Value> {
    serde_json::to_value(result).map_err(McpError::Json)
}
