//! ConfSync Admin CLI
//!
//! Operator tool for browsing, editing and auditing a ConfSync
//! configuration service.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use confsync_core::client::TcpChannel;
use confsync_core::modificator::Modificator;
use confsync_core::protocol::Credentials;

mod commands;

use commands::*;

#[derive(Parser)]
#[command(name = "confsync-admin")]
#[command(about = "ConfSync administration CLI")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, default_value = "tcp://127.0.0.1:9135")]
    server: String,

    /// Username recorded as committer
    #[arg(short, long, default_value = "anonymous")]
    user: String,

    /// Group recorded as committer
    #[arg(short, long, default_value = "users")]
    group: String,

    /// Distinguished name recorded as committer
    #[arg(long)]
    dn: Option<String>,

    /// On a stale push, rebase onto the latest version and retry once
    #[arg(short, long)]
    merge: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse the live configuration
    Show {
        #[command(subcommand)]
        action: ShowCommands,
    },
    /// Edit the configuration and push the result
    Edit {
        #[command(subcommand)]
        action: EditCommands,
    },
    /// Commit history and audit diffs
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },
    /// Restore an archived version as the new current state
    Rollback { version: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_target(false)
        .init();

    let dn = cli
        .dn
        .clone()
        .unwrap_or_else(|| format!("/CN={}", cli.user));
    let credentials = Credentials::new(cli.user.clone(), cli.group.clone(), dn);
    let committer = credentials.committer_id();
    let channel = Arc::new(TcpChannel::new(cli.server.clone(), credentials));
    let mut session = Modificator::new(channel, committer);

    match cli.command {
        Commands::Show { action } => execute_show_command(&mut session, action).await,
        Commands::Edit { action } => execute_edit_command(&mut session, action, cli.merge).await,
        Commands::History { action } => execute_history_command(&mut session, action).await,
        Commands::Rollback { version } => execute_rollback_command(&session, &version).await,
    }
}
