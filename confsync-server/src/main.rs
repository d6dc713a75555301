//! ConfSync Server - Master/slave configuration service
//!
//! Main server process: loads the node settings, decides the role from
//! the master URL and serves the replication protocol over TCP.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use confsync_core::settings::NodeSettings;

mod server;

#[derive(Parser, Debug)]
#[command(name = "confsync-server")]
#[command(about = "ConfSync - replicated configuration service")]
#[command(version)]
struct Args {
    /// Node settings file (created with defaults if missing)
    #[arg(short = 'c', long, default_value = "confsync.toml")]
    config: PathBuf,

    /// Override the TCP bind address
    #[arg(short = 'H', long)]
    bind: Option<String>,

    /// Override the working directory
    #[arg(short = 'D', long)]
    workdir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::new(format!(
        "confsync_server={},confsync_core={}",
        log_level, log_level
    ));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let mut settings =
        NodeSettings::load_or_init(&args.config).context("failed to load node settings")?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(workdir) = args.workdir {
        settings.workdir = workdir;
    }
    settings.validate().context("invalid node settings")?;

    info!(
        config = %args.config.display(),
        bind = %settings.bind_addr,
        "confsync-server starting"
    );

    let (shutdown, _) = broadcast::channel(1);
    let node = tokio::spawn(server::run(settings, shutdown.clone()));

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    let _ = shutdown.send(());

    node.await.context("node task panicked")??;
    Ok(())
}
