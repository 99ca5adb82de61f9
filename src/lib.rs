//! # Troubleshooter
//!
//! Guides a user through a troubleshooting decision tree. Each step is a
//! question with ordered multiple-choice answers; each answer leads either to
//! another question or to a conclusion. Every traversal is recorded as a
//! session for analytics.
//!
//! ## Features
//!
//! - **Traversal**: current-step resolution, answer validation, replay-safe finalization
//! - **Session recording**: append-only history captured as text at traversal time
//! - **Analytics**: completion counts, top conclusions, mean path length
//! - **Tree administration**: question and answer editing, reordering, validation, JSON import
//!
//! ## Architecture
//!
//! ```text
//! Client → JSON-RPC (stdio) → TraversalEngine / TreeEditor / AnalyticsAggregator
//!                                        ↓
//!                                 SQLite (tree + sessions)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use troubleshooter::engine::TraversalEngine;
//! use troubleshooter::storage::{SessionOrigin, SqliteStorage};
//! use troubleshooter::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let engine = TraversalEngine::new(storage.clone(), storage, &config.tree);
//!
//!     let session = engine.start(SessionOrigin::default()).await?;
//!     let step = engine.current_step(&session).await?;
//!     println!("{}", serde_json::to_string_pretty(&step)?);
//!     Ok(())
//! }
//! ```

/// Command-line subcommands.
pub mod cli;
/// Configuration management.
pub mod config;
/// Traversal engine, session recorder and analytics.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// JSON-RPC server implementation and request handling.
pub mod server;
/// Tree and session storage.
pub mod storage;
/// Tree administration, validation and import.
pub mod tree;

pub use config::Config;
pub use engine::{AnalyticsAggregator, SessionRecorder, TraversalEngine};
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
pub use tree::TreeEditor;
