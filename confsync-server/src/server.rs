//! Node runtime: wires the store, service and background tasks
//!
//! Master nodes accept pushes and run the slave-liveness housekeeping
//! loop; slave nodes run the refresh/heartbeat loop. Both roles serve
//! the read-only snapshot RPCs so slaves can feed their peers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use confsync_core::client::TcpConnector;
use confsync_core::net::Listener;
use confsync_core::protocol::Credentials;
use confsync_core::refresher::{RefreshConfig, Refresher};
use confsync_core::service::ConfigService;
use confsync_core::settings::NodeSettings;
use confsync_core::store::ConfigStore;

/// Run one node until the shutdown channel fires.
pub async fn run(settings: NodeSettings, shutdown: broadcast::Sender<()>) -> Result<()> {
    let store = Arc::new(ConfigStore::new(&settings).context("failed to set up store")?);
    store
        .load()
        .context("failed to load local configuration")?;

    let service = Arc::new(
        ConfigService::new(Arc::clone(&store), &settings)
            .context("failed to initialize configuration service")?,
    );

    let mut tasks = Vec::new();
    if store.is_master() {
        info!(name = %store.name(), "starting in master mode");
        tasks.push(Arc::clone(&service).spawn_housekeeping(shutdown.subscribe()));
    } else {
        info!(master = %settings.master_url, "starting in slave mode");
        let credentials = Credentials::new("confsync", "hosts", settings.self_url.clone());
        let connector = Arc::new(TcpConnector::new(credentials));
        let refresher = Arc::new(Refresher::new(
            Arc::clone(&store),
            connector,
            RefreshConfig {
                master_url: settings.master_url.clone(),
                gateway_url: settings.gateway_url.clone(),
                self_url: settings.self_url.clone(),
                default_refresh_secs: settings.refresh_secs,
                auto_publish: settings.auto_publish,
            },
        ));
        tasks.push(refresher.spawn(shutdown.subscribe()));
    }

    let listener = Listener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    listener.serve(service, shutdown.subscribe()).await;

    for task in tasks {
        let _ = task.await;
    }
    info!("node stopped");
    Ok(())
}
