//! Server module for the JSON-RPC tool surface.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::engine::{AnalyticsAggregator, TraversalEngine};
use crate::storage::SqliteStorage;
use crate::tree::TreeEditor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend for both the tree and the sessions.
    pub storage: SqliteStorage,
    /// Traversal engine over the shared store.
    pub engine: TraversalEngine<SqliteStorage, SqliteStorage>,
    /// Administrative tree operations.
    pub editor: TreeEditor<SqliteStorage>,
    /// Session analytics.
    pub analytics: AnalyticsAggregator,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        tracing::info!(
            start_question = %config.tree.start_question,
            top_conclusions = config.analytics.top_conclusions,
            "AppState initializing"
        );

        let engine = TraversalEngine::new(storage.clone(), storage.clone(), &config.tree);
        let editor = TreeEditor::new(storage.clone());
        let analytics = AnalyticsAggregator::new(config.analytics.top_conclusions);

        Self {
            config,
            storage,
            engine,
            editor,
            analytics,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
