//! JSON-RPC 2.0 over stdio.
//!
//! One request per line on stdin, one response per line on stdout. Logs go
//! to stderr so stdout stays a clean protocol channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::{handle_tool_call, SharedState};
use crate::error::{McpError, McpResult};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "troubleshooter";

/// Invalid JSON on the wire.
pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// An incoming request or notification.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications, which never get a response.
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A reply to a request. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Echoes the request id, or null when the request could not be parsed.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub tools: ToolCapabilities,
}

#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// The tool set is fixed for the life of the process.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Reply to `initialize`.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// A callable tool and the JSON Schema of its arguments.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `params` of a `tools/call` request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Body of a `tools/call` reply. Tool failures are reported here with
/// `isError` set rather than as JSON-RPC errors.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResult {
    fn text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolResultContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: is_error.then_some(true),
        }
    }

    /// Wrap a handler outcome as a single text item.
    pub fn from_outcome(outcome: McpResult<Value>) -> Self {
        match outcome {
            Ok(value) => match serde_json::to_string_pretty(&value) {
                Ok(text) => Self::text(text, false),
                Err(e) => {
                    error!(error = %e, "Failed to serialize tool result");
                    Self::text(format!("Error: {}", McpError::from(e)), true)
                }
            },
            Err(e) => Self::text(error_text(&e), true),
        }
    }
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Serialize `body` as the result, falling back to an internal error.
    fn from_serializable<T: Serialize>(id: Option<Value>, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => Self::success(id, value),
            Err(e) => {
                error!(error = %e, "Failed to serialize response body");
                Self::error(id, INTERNAL_ERROR, format!("Internal error: {}", e))
            }
        }
    }
}

/// Stdio front end for the tool surface.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve requests until stdin closes.
    pub async fn run(&self) -> std::io::Result<()> {
        info!(server = SERVER_NAME, "Server listening on stdio");

        let mut reader = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            if let Some(response) = self.process_line(&line).await {
                let json = serde_json::to_string(&response)?;
                debug!(response = %json, "Sending response");
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            line.clear();
        }

        info!("Stdin closed, shutting down");
        Ok(())
    }

    /// Handle one line of input. Blank lines and notifications yield nothing.
    pub async fn process_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        debug!(request = %line, "Received request");

        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!(error = %e, "Unparseable request");
                Some(JsonRpcResponse::error(
                    None,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let response = match method.as_str() {
            "initialize" => self.handle_initialize(id.clone()),
            "tools/list" => {
                JsonRpcResponse::success(id.clone(), serde_json::json!({ "tools": all_tools() }))
            }
            "tools/call" => self.handle_tool_call(id.clone(), params).await,
            "ping" => JsonRpcResponse::success(id.clone(), Value::Object(Default::default())),
            other => {
                debug!(method = %other, "Unhandled method");
                JsonRpcResponse::error(
                    id.clone(),
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                )
            }
        };

        // Notifications (`initialized`, `notifications/cancelled`, ...) never
        // get a reply, whatever the method.
        id.map(|_| response)
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Client initializing");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        JsonRpcResponse::from_serializable(id, &result)
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params = match params.map(serde_json::from_value::<ToolCallParams>) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e))
            }
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
        };

        let outcome = handle_tool_call(&self.state, &params.name, params.arguments).await;
        if let Err(e) = &outcome {
            info!(tool = %params.name, error = %e, "Tool call failed");
        }

        JsonRpcResponse::from_serializable(id, &ToolCallResult::from_outcome(outcome))
    }
}

/// Render a failed tool call. Traversal failures carry the recovery hint as
/// JSON so the caller can act on it.
fn error_text(err: &McpError) -> String {
    match err.recovery() {
        Some(recovery) => serde_json::json!({
            "error": err.to_string(),
            "recovery": recovery,
        })
        .to_string(),
        None => format!("Error: {}", err),
    }
}

/// Every tool the server advertises.
pub fn all_tools() -> Vec<Tool> {
    vec![
        // Traversal
        get_session_start_tool(),
        get_session_current_step_tool(),
        get_session_submit_answer_tool(),
        get_session_restart_tool(),
        // Analytics
        get_analytics_summary_tool(),
        // Tree administration
        get_tree_list_tool(),
        get_tree_add_question_tool(),
        get_tree_edit_question_tool(),
        get_tree_delete_question_tool(),
        get_tree_add_answer_tool(),
        get_tree_edit_answer_tool(),
        get_tree_delete_answer_tool(),
        get_tree_move_answer_tool(),
        get_tree_validate_tool(),
        get_tree_import_tool(),
    ]
}

// ============================================================================
// Traversal tools
// ============================================================================

fn get_session_start_tool() -> Tool {
    Tool {
        name: "session_start".to_string(),
        description: "Start a new troubleshooting session at the start question. Returns the session and its first step.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "client_address": {
                    "type": "string",
                    "description": "Caller network address, recorded for analytics"
                },
                "user_agent": {
                    "type": "string",
                    "description": "Client identifier string, recorded for analytics"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_session_current_step_tool() -> Tool {
    Tool {
        name: "session_current_step".to_string(),
        description: "Get the question (with ordered choices) or conclusion a session is at.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to resolve"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

fn get_session_submit_answer_tool() -> Tool {
    Tool {
        name: "session_submit_answer".to_string(),
        description: "Submit the chosen answer for the session's current question. Returns the outcome and the next step.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to advance"
                },
                "answer_id": {
                    "type": "integer",
                    "description": "Identity of the chosen answer"
                }
            },
            "required": ["session_id", "answer_id"],
            "additionalProperties": false
        }),
    }
}

fn get_session_restart_tool() -> Tool {
    Tool {
        name: "session_restart".to_string(),
        description: "Start over with a fresh session. The previous session is left as it is.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session being replaced"
                }
            },
            "required": ["session_id"],
            "additionalProperties": false
        }),
    }
}

fn get_analytics_summary_tool() -> Tool {
    Tool {
        name: "analytics_summary".to_string(),
        description: "Session totals, completion rate, top conclusions and mean path length.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

// ============================================================================
// Tree administration tools
// ============================================================================

fn get_tree_list_tool() -> Tool {
    Tool {
        name: "tree_list".to_string(),
        description: "List every question with its ordered answers.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

fn get_tree_add_question_tool() -> Tool {
    Tool {
        name: "tree_add_question".to_string(),
        description: "Add a question to the tree.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": {
                    "type": "string",
                    "description": "Unique key for the question"
                },
                "text": {
                    "type": "string",
                    "description": "Question text shown to the user"
                },
                "category": {
                    "type": "string",
                    "description": "Optional grouping label"
                }
            },
            "required": ["question_id", "text"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_edit_question_tool() -> Tool {
    Tool {
        name: "tree_edit_question".to_string(),
        description: "Edit a question's text or category, or rename its key. Renaming is refused while any answer points at the question.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": {
                    "type": "string",
                    "description": "Key of the question to edit"
                },
                "text": {
                    "type": "string",
                    "description": "New question text"
                },
                "category": {
                    "type": "string",
                    "description": "New category; an empty string clears it"
                },
                "new_question_id": {
                    "type": "string",
                    "description": "New key for the question"
                }
            },
            "required": ["question_id"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_delete_question_tool() -> Tool {
    Tool {
        name: "tree_delete_question".to_string(),
        description: "Delete a question and its answers. Answers elsewhere that point at it are left dangling.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": {
                    "type": "string",
                    "description": "Key of the question to delete"
                }
            },
            "required": ["question_id"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_add_answer_tool() -> Tool {
    Tool {
        name: "tree_add_answer".to_string(),
        description: "Add an answer to a question. Set next_question_id or conclusion, not both.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": {
                    "type": "string",
                    "description": "Key of the owning question"
                },
                "text": {
                    "type": "string",
                    "description": "Answer text shown to the user"
                },
                "next_question_id": {
                    "type": "string",
                    "description": "Key of the question this answer leads to"
                },
                "conclusion": {
                    "type": "string",
                    "description": "Conclusion reached by this answer"
                },
                "order": {
                    "type": "integer",
                    "description": "Display order; defaults to after the last answer"
                }
            },
            "required": ["question_id", "text"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_edit_answer_tool() -> Tool {
    Tool {
        name: "tree_edit_answer".to_string(),
        description: "Edit an answer's text or target. Setting either target replaces both.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "answer_id": {
                    "type": "integer",
                    "description": "Identity of the answer"
                },
                "text": {
                    "type": "string",
                    "description": "New answer text"
                },
                "next_question_id": {
                    "type": "string",
                    "description": "New next question key"
                },
                "conclusion": {
                    "type": "string",
                    "description": "New conclusion text"
                }
            },
            "required": ["answer_id"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_delete_answer_tool() -> Tool {
    Tool {
        name: "tree_delete_answer".to_string(),
        description: "Delete an answer.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "answer_id": {
                    "type": "integer",
                    "description": "Identity of the answer"
                }
            },
            "required": ["answer_id"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_move_answer_tool() -> Tool {
    Tool {
        name: "tree_move_answer".to_string(),
        description: "Swap an answer with its neighbour above or below.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "answer_id": {
                    "type": "integer",
                    "description": "Identity of the answer"
                },
                "direction": {
                    "type": "string",
                    "enum": ["up", "down"],
                    "description": "Which neighbour to swap with"
                }
            },
            "required": ["answer_id", "direction"],
            "additionalProperties": false
        }),
    }
}

fn get_tree_validate_tool() -> Tool {
    Tool {
        name: "tree_validate".to_string(),
        description: "Check the tree for missing start, dangling pointers, empty questions, unreachable questions and loops.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

fn get_tree_import_tool() -> Tool {
    Tool {
        name: "tree_import".to_string(),
        description: "Import a whole tree document in one transaction.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "document": {
                    "type": "object",
                    "description": "Tree document: {\"questions\": {key: {text, category?, answers: [{text, next? | conclusion?}]}}}"
                },
                "replace": {
                    "type": "boolean",
                    "default": false,
                    "description": "Clear the existing tree first"
                }
            },
            "required": ["document"],
            "additionalProperties": false
        }),
    }
}
