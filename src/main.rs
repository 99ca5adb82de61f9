use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use troubleshooter::{
    cli::{execute_command, Commands},
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    storage::{SqliteStorage, TreeStore},
    tree::TreeDocument,
};

/// Troubleshooting decision tree server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Troubleshooter starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let state = AppState::new(config, storage);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(state).await,
        command => {
            let result = execute_command(command, &state).await;
            if result.exit_code == 0 {
                println!("{}", result.message);
            } else {
                eprintln!("{}", result.message);
            }
            std::process::exit(result.exit_code);
        }
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    seed_tree(&state).await?;

    let server = McpServer::new(Arc::new(state));

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Import the configured seed document when the tree is empty.
async fn seed_tree(state: &AppState) -> anyhow::Result<()> {
    let Some(path) = state.config.tree.seed_path.as_deref() else {
        return Ok(());
    };

    if !state.storage.list_questions().await?.is_empty() {
        info!(path = %path.display(), "Tree already populated, skipping seed");
        return Ok(());
    }

    let document = TreeDocument::from_path(path).await?;
    let report = state.editor.import(document, false).await?;
    info!(
        path = %path.display(),
        questions = report.questions,
        answers = report.answers,
        "Tree seeded"
    );

    let validation = state.editor.validate(state.engine.start_question()).await?;
    if !validation.is_valid() {
        warn!(
            errors = validation.errors().count(),
            "Seeded tree has errors; run `troubleshooter validate` for details"
        );
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
