//! Command-line subcommands for tree maintenance and reporting.

use std::path::PathBuf;

use clap::Subcommand;

use crate::server::AppState;
use crate::tree::{Issue, Severity, TreeDocument};

/// Subcommands besides the default `serve`.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the JSON-RPC server on stdio (default)
    Serve,

    /// Import a JSON tree document
    Import {
        /// Path to the tree document
        file: PathBuf,

        /// Clear the existing tree before importing
        #[arg(long)]
        replace: bool,
    },

    /// Check the stored tree and print any issues
    Validate,

    /// Print session analytics as JSON
    Summary,
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a one-shot command. `Serve` is handled by the binary itself.
pub async fn execute_command(command: Commands, state: &AppState) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not a one-shot command"),
        Commands::Import { file, replace } => execute_import(state, file, replace).await,
        Commands::Validate => execute_validate(state).await,
        Commands::Summary => execute_summary(state).await,
    }
}

async fn execute_import(state: &AppState, file: PathBuf, replace: bool) -> CliResult {
    let document = match TreeDocument::from_path(&file).await {
        Ok(document) => document,
        Err(e) => return CliResult::error(e.to_string()),
    };

    match state.editor.import(document, replace).await {
        Ok(report) => CliResult::success(format!(
            "Imported {} questions and {} answers from {}",
            report.questions,
            report.answers,
            file.display()
        )),
        Err(e) => CliResult::error(e.to_string()),
    }
}

async fn execute_validate(state: &AppState) -> CliResult {
    let start = state.engine.start_question();
    let report = match state.editor.validate(start).await {
        Ok(report) => report,
        Err(e) => return CliResult::error(e.to_string()),
    };

    let mut output = format!(
        "Tree: {} questions, {} answers, start '{}'\n",
        report.question_count, report.answer_count, start
    );
    for issue in &report.issues {
        let label = match issue.severity() {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        output.push_str(&format!("  {}: {}\n", label, describe(issue)));
    }

    if report.is_valid() {
        output.push_str("OK");
        CliResult::success(output)
    } else {
        output.push_str("INVALID");
        CliResult::error(output)
    }
}

async fn execute_summary(state: &AppState) -> CliResult {
    let summary = match state.analytics.summarize_store(state.engine.sessions()).await {
        Ok(summary) => summary,
        Err(e) => return CliResult::error(e.to_string()),
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => CliResult::success(json),
        Err(e) => CliResult::error(format!("Failed to serialize summary: {}", e)),
    }
}

fn describe(issue: &Issue) -> String {
    match issue {
        Issue::MissingStart { question_id } => {
            format!("start question '{}' does not exist", question_id)
        }
        Issue::DanglingNext {
            answer_id,
            question_id,
            next_question_id,
        } => format!(
            "answer {} of '{}' points at missing question '{}'",
            answer_id, question_id, next_question_id
        ),
        Issue::NoNextStep {
            answer_id,
            question_id,
        } => format!(
            "answer {} of '{}' has neither a next question nor a conclusion",
            answer_id, question_id
        ),
        Issue::ConflictingTargets {
            answer_id,
            question_id,
        } => format!(
            "answer {} of '{}' has both a next question and a conclusion",
            answer_id, question_id
        ),
        Issue::NoAnswers { question_id } => format!("question '{}' has no answers", question_id),
        Issue::Unreachable { question_id } => {
            format!("question '{}' cannot be reached from the start", question_id)
        }
        Issue::Cycle { path } => format!("loop {}", path.join(" -> ")),
    }
}
