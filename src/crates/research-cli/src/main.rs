//! # research-cli
//!
//! Start, approve and inspect research sessions from the command line.
//! Every command prints JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use research_agent::{ResearchConfig, ResearchService};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "research")]
#[command(about = "Self-correcting research assistant with durable sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Checkpoint database path (overrides CHECKPOINT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new research session
    Start {
        /// Research question
        query: String,

        /// Session id (random 8-character id when omitted)
        #[arg(long)]
        thread_id: Option<String>,

        /// Run straight through without pausing for approval
        #[arg(long)]
        no_hitl: bool,
    },

    /// Approve a paused session, or reject it
    Approve {
        thread: String,

        /// Feedback for the writer
        #[arg(short, long)]
        feedback: Option<String>,

        /// Reject instead of approving
        #[arg(long)]
        reject: bool,
    },

    /// Show the status and state of a session
    Status { thread: String },

    /// List the checkpoints of a session
    History { thread: String },

    /// Show the state stored in one checkpoint
    Show { thread: String, sequence: u64 },

    /// List all sessions
    Sessions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ResearchConfig::from_env().context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config = config.with_checkpoint_db_path(db);
    }
    tracing::debug!(?config, "Configuration loaded");

    let service = ResearchService::from_config(&config)
        .await
        .context("Failed to initialize research service")?;

    match cli.command {
        Commands::Start {
            query,
            thread_id,
            no_hitl,
        } => print_json(&service.start(&query, thread_id, !no_hitl).await?),
        Commands::Approve {
            thread,
            feedback,
            reject,
        } => print_json(&service.approve(&thread, !reject, feedback).await?),
        Commands::Status { thread } => print_json(&service.session(&thread).await?),
        Commands::History { thread } => print_json(&service.checkpoints(&thread).await?),
        Commands::Show { thread, sequence } => {
            print_json(&service.checkpoint_state(&thread, sequence).await?)
        }
        Commands::Sessions => print_json(&service.sessions().await?),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let cli = Cli::try_parse_from(["research", "start", "What is Rust?", "--no-hitl"]).unwrap();
        match cli.command {
            Commands::Start {
                query,
                thread_id,
                no_hitl,
            } => {
                assert_eq!(query, "What is Rust?");
                assert!(thread_id.is_none());
                assert!(no_hitl);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_approve_with_global_db() {
        let cli = Cli::try_parse_from([
            "research", "approve", "abc12345", "--feedback", "more sources", "--db", "/tmp/r.db",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/r.db")));
        match cli.command {
            Commands::Approve {
                thread,
                feedback,
                reject,
            } => {
                assert_eq!(thread, "abc12345");
                assert_eq!(feedback.as_deref(), Some("more sources"));
                assert!(!reject);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_requires_sequence() {
        assert!(Cli::try_parse_from(["research", "show", "abc"]).is_err());
        let cli = Cli::try_parse_from(["research", "show", "abc", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Show { sequence: 3, .. }));
    }
}
