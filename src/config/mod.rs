use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub tree: TreeConfig,
    pub analytics: AnalyticsConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Decision tree configuration
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Key of the question every new session starts at.
    pub start_question: String,
    /// Tree document imported at startup when the tree is empty.
    pub seed_path: Option<PathBuf>,
}

/// Analytics configuration
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Length of the top-conclusions table.
    pub top_conclusions: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH")
                    .unwrap_or_else(|_| "./data/troubleshooter.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let start_question =
            env::var("TREE_START_QUESTION").unwrap_or_else(|_| TreeConfig::DEFAULT_START.to_string());
        if start_question.trim().is_empty() {
            return Err(AppError::Config {
                message: "TREE_START_QUESTION cannot be empty".to_string(),
            });
        }

        let tree = TreeConfig {
            start_question,
            seed_path: env::var("TREE_SEED_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        let analytics = AnalyticsConfig {
            top_conclusions: env::var("ANALYTICS_TOP_CONCLUSIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(AnalyticsConfig::DEFAULT_TOP_CONCLUSIONS),
        };

        Ok(Config {
            database,
            logging,
            tree,
            analytics,
        })
    }
}

impl TreeConfig {
    /// Conventional start key.
    pub const DEFAULT_START: &'static str = "start";
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            start_question: Self::DEFAULT_START.to_string(),
            seed_path: None,
        }
    }
}

impl AnalyticsConfig {
    /// Default length of the top-conclusions table.
    pub const DEFAULT_TOP_CONCLUSIONS: usize = 10;
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_conclusions: Self::DEFAULT_TOP_CONCLUSIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
