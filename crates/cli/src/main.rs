//! ChatRelay CLI entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `history`: Print recent conversation records
//! - `knowledge`: Rank knowledge documents against a query
//! - `config`: Print the effective configuration
//! - `init`: Write a default config file

use chatrelay_config::{AppConfig, ConfigError};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "ChatRelay: streaming chat gateway for local LLMs",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.chatrelay/config.toml)
    #[arg(short, long, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Print recent records from a daily history log
    History {
        /// Day to read, as YYYYMMDD (default: today)
        #[arg(short, long)]
        date: Option<String>,

        /// Number of records (default: generation.history_count)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Rank knowledge documents against a query
    Knowledge {
        query: String,

        /// Number of matches (default: generation.knowledge_max_results)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Write a default config file
    Init,
}

fn config_path(cli_path: Option<&Path>) -> PathBuf {
    cli_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load_from(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::prelude::*;

    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = config_path(cli.config.as_deref());
    let config = load_config(&path);

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|c| c.logging.file.clone()));
    init_tracing(cli.verbose, log_file.as_deref())?;

    // `init` must work even when the existing config is broken
    let config = config.map_err(|e| format!("Failed to load config: {e}"));

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(config?, port, host).await?,
        Commands::History { date, limit } => commands::history::run(&config?, date, limit).await?,
        Commands::Knowledge { query, limit } => {
            commands::knowledge::run(&config?, &query, limit).await?
        }
        Commands::Config => commands::config_cmd::run(&config?, &path),
        Commands::Init => commands::init::run(&path)?,
    }

    Ok(())
}
