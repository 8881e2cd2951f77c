//! # rag-agent CLI (`ragent`)
//!
//! ## Usage
//!
//! ```bash
//! ragent --config ./config/ragent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragent serve` | Start the HTTP API |
//! | `ragent ask "<question>"` | Answer one question with the agent loop |
//! | `ragent sync` | Rebuild the index from the documents folder |
//! | `ragent status` | Show chunk counts per indexed document |
//! | `ragent history` | Print (or `--clear`) the conversation history |
//! | `ragent exec "<code>"` | Run Lua in the agent's executor |
//!
//! Logs go to stderr (filter with `RUST_LOG`); results go to stdout.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use rag_agent::app::AppContext;
use rag_agent::config::{self, Config};
use rag_agent::executor::{CodeExecutor, LuaExecutor};
use rag_agent::server;

const DEFAULT_CONFIG: &str = "./config/ragent.toml";

/// Local retrieval-augmented agent: answers questions from your documents
/// and runs Lua when it needs to compute something.
#[derive(Parser)]
#[command(name = "ragent", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ragent.toml`; if that file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Ask a single question.
    Ask {
        question: String,

        /// Also print each executed code step.
        #[arg(long)]
        steps: bool,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the index from `[documents].root`.
    Sync,

    /// Show what the index currently holds.
    Status,

    /// Print recent conversation history.
    History {
        /// Number of most recent entries to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Delete all history instead of printing it.
        #[arg(long)]
        clear: bool,
    },

    /// Run Lua code in the sandboxed executor and print its output.
    Exec { code: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rag_agent=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(default)
            } else {
                warn!(path = DEFAULT_CONFIG, "no config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = resolve_config(cli.config.as_deref())?;

    // Runs without touching the stores or the inference service.
    if let Commands::Exec { code } = &cli.command {
        let executor = LuaExecutor::new(Duration::from_secs(cfg.agent.exec_timeout_secs))?;
        println!("{}", executor.run(code).await);
        return Ok(());
    }

    let ctx = Arc::new(AppContext::bootstrap(cfg)?);

    match cli.command {
        Commands::Serve => {
            server::run_server(ctx).await?;
        }
        Commands::Ask {
            question,
            steps,
            json,
        } => {
            let result = ctx.ask(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if steps {
                    for (i, step) in result.steps.iter().enumerate() {
                        println!("--- step {} ---", i + 1);
                        println!("{}", step.describe());
                    }
                    if !result.steps.is_empty() {
                        println!("--- answer ---");
                    }
                }
                println!("{}", result.answer);
            }
        }
        Commands::Sync => {
            let report = ctx.sync_documents().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let status = ctx.index_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::History { limit, clear } => {
            if clear {
                ctx.clear_history().await?;
                println!("history cleared");
            } else {
                let entries = ctx.history().await;
                let start = entries.len().saturating_sub(limit);
                for entry in &entries[start..] {
                    let when = chrono::DateTime::from_timestamp_millis(
                        (entry.timestamp * 1000.0) as i64,
                    )
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                    println!("[{}] {}: {}", when, entry.role.as_str(), entry.content);
                }
            }
        }
        Commands::Exec { .. } => {}
    }

    Ok(())
}
