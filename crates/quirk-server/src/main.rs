//! Server binary for running Quirk programs submitted over HTTP
//!
//! `quirk-server` (or `quirk-server serve`) starts the HTTP front end;
//! `quirk-server exec <file>` pushes a single file through the same execution
//! core and prints the response the editor would receive, which is handy for
//! checking an interpreter setup without a browser.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use quirk_core::{CodeRunner, ConfigLoader, ExecutionRequest, QuirkConfig};
use quirk_server::{shutdown_signal, QuirkServer, ServerConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Quirk Server - run Quirk programs for the web editor")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, global = true, help = "Configuration file (defaults to ./quirk.yaml when present)")]
    config: Option<PathBuf>,

    #[clap(long, global = true, help = "Address to listen on, overrides the config file")]
    bind_addr: Option<String>,

    #[clap(long, short, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default command)
    Serve,
    /// Execute one source file and print the JSON response
    Exec {
        /// Path to a Quirk source file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let mut config = ConfigLoader::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    if let Some(bind_addr) = cli.bind_addr {
        config.server.bind_addr = bind_addr;
    }

    match cli.command {
        Some(Commands::Exec { file }) => exec_file(config, file).await,
        Some(Commands::Serve) | None => run_server(config).await,
    }
}

async fn run_server(config: QuirkConfig) -> Result<()> {
    let runner = CodeRunner::new(&config.runner)?;
    let server_config = ServerConfig::from_settings(&config.server)?;

    log::info!("Starting Quirk server on {}...", server_config.bind_addr);
    let server = QuirkServer::with_config(runner, server_config);

    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn exec_file(config: QuirkConfig, file: PathBuf) -> Result<()> {
    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let runner = CodeRunner::new(&config.runner)?;
    let outcome = runner.submit(ExecutionRequest::new(code)).await;

    println!("{}", serde_json::to_string_pretty(&outcome.into_response())?);
    Ok(())
}
