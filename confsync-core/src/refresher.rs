//! Slave-side background refresh
//!
//! A cooperative polling loop, not an event stream: every cycle the
//! refresher asks a candidate server for a newer snapshot and adopts it
//! locally, firing a new-version event for in-process listeners. The
//! candidate order is gateway override > forced master > the full known
//! server list in randomized order, and a cycle only fails once every
//! candidate has failed. There is no backoff: a failed cycle simply
//! waits out the fixed interval and tries again with a fresh order.
//!
//! The polling interval itself is replicated state: after a successful
//! refresh the loop re-reads it from the adopted tree, so the master can
//! slow its fleet down or speed it up without redeploying anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::Connector;
use crate::codec;
use crate::error::{ConfigError, ConfigResult};
use crate::store::ConfigStore;
use crate::tree::CfgTree;

/// Fired whenever a strictly newer version is adopted locally.
#[derive(Debug, Clone)]
pub struct NewVersionEvent {
    pub version: String,
}

/// Refresh-loop wiring derived from the node settings.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub master_url: String,
    pub gateway_url: Option<String>,
    pub self_url: String,
    pub default_refresh_secs: u64,
    pub auto_publish: bool,
}

/// Background refresh driver for a slave node.
pub struct Refresher {
    store: Arc<ConfigStore>,
    connector: Arc<dyn Connector>,
    config: RefreshConfig,
    enabled: AtomicBool,
    events: broadcast::Sender<NewVersionEvent>,
}

impl Refresher {
    pub fn new(
        store: Arc<ConfigStore>,
        connector: Arc<dyn Connector>,
        config: RefreshConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            connector,
            config,
            enabled: AtomicBool::new(true),
            events,
        }
    }

    /// Listen for adopted versions.
    pub fn subscribe(&self) -> broadcast::Receiver<NewVersionEvent> {
        self.events.subscribe()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// While disabled, every refresh is a successful no-op.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Candidate servers for one cycle, best first.
    pub(crate) fn candidates(&self, from_master: bool) -> Vec<String> {
        if let Some(gateway) = &self.config.gateway_url {
            return vec![gateway.clone()];
        }
        if from_master {
            return vec![self.config.master_url.clone()];
        }
        let mut servers = self.store.servers();
        servers.retain(|url| url != &self.config.self_url);
        if servers.is_empty() {
            return vec![self.config.master_url.clone()];
        }
        servers.shuffle(&mut rand::thread_rng());
        servers
    }

    /// Try each candidate until one answers; adopt its snapshot if it is
    /// strictly newer than ours. `Ok(None)` means we were already
    /// current (or the refresher is disabled).
    pub async fn refresh(&self, from_master: bool) -> ConfigResult<Option<String>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let local = self.store.current_version();
        let mut failures = Vec::new();

        for url in self.candidates(from_master) {
            let channel = self.connector.connect(&url);
            match channel.get_compressed_data_if_newer(&local).await {
                Ok(Some(data)) => {
                    debug!(server = %url, "received newer snapshot");
                    return self.adopt(&data).await;
                }
                Ok(None) => {
                    debug!(server = %url, "already at the current version");
                    return Ok(None);
                }
                Err(e) => {
                    warn!(server = %url, "refresh attempt failed: {e}");
                    failures.push(format!("{url}: {e}"));
                }
            }
        }
        Err(ConfigError::AllServersFailed(failures.join("; ")))
    }

    /// Convenience used by callers that do not care about the source.
    pub async fn force_refresh(&self) -> ConfigResult<Option<String>> {
        self.refresh(false).await
    }

    /// Heartbeat half of the liveness protocol: refresh from the master
    /// specifically, then (when configured) publish ourselves back so
    /// the master keeps us in its replica set.
    pub async fn refresh_and_publish(&self) -> ConfigResult<Option<String>> {
        let adopted = self.refresh(true).await?;
        if self.config.auto_publish && self.is_enabled() {
            let master = self.connector.connect(&self.config.master_url);
            if let Err(e) = master.publish_slave(&self.config.self_url).await {
                warn!("failed to publish ourselves to the master: {e}");
            }
        }
        Ok(adopted)
    }

    async fn adopt(&self, data: &[u8]) -> ConfigResult<Option<String>> {
        let text = codec::decompress(data)?;
        let tree =
            CfgTree::from_text(&text).map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        match self.store.adopt_snapshot(tree)? {
            Some(version) => {
                info!(version = %version, "new configuration version adopted");
                let _ = self.events.send(NewVersionEvent {
                    version: version.clone(),
                });
                Ok(Some(version))
            }
            None => Ok(None),
        }
    }

    /// Effective polling interval: the tree's published value wins over
    /// the deployment default.
    fn interval(&self) -> Duration {
        let secs = self
            .store
            .published_refresh_secs()
            .unwrap_or(self.config.default_refresh_secs);
        Duration::from_secs(secs.max(1))
    }

    /// Run the refresh loop until shutdown. One refresh fires right
    /// away so a freshly booted slave catches up without waiting a full
    /// interval.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("refresh loop started");
            if let Err(e) = self.refresh_and_publish().await {
                warn!("initial refresh failed: {e}");
            }
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval()) => {
                        if let Err(e) = self.refresh_and_publish().await {
                            warn!("refresh cycle failed: {e}");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("refresh loop stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConfigChannel;
    use crate::protocol::{Credentials, Request, Response};
    use crate::service::ConfigService;
    use crate::settings::NodeSettings;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::TempDir;

    const MASTER_URL: &str = "tcp://master:9135";
    const SLAVE_URL: &str = "tcp://slave:9135";

    struct LoopbackChannel {
        service: Arc<ConfigService>,
        credentials: Credentials,
    }

    #[async_trait]
    impl ConfigChannel for LoopbackChannel {
        async fn call(&self, request: Request) -> ConfigResult<Response> {
            Ok(self.service.handle(&self.credentials, request))
        }
    }

    struct FailChannel;

    #[async_trait]
    impl ConfigChannel for FailChannel {
        async fn call(&self, _request: Request) -> ConfigResult<Response> {
            Err(ConfigError::Transport("connection refused".to_string()))
        }
    }

    /// Routes every URL to the master service unless listed as down.
    struct TestConnector {
        master: Arc<ConfigService>,
        down: HashSet<String>,
    }

    impl Connector for TestConnector {
        fn connect(&self, url: &str) -> Arc<dyn ConfigChannel> {
            if self.down.contains(url) {
                Arc::new(FailChannel)
            } else {
                Arc::new(LoopbackChannel {
                    service: Arc::clone(&self.master),
                    credentials: Credentials::new("refresher", "hosts", SLAVE_URL),
                })
            }
        }
    }

    fn master_service(dir: &Path) -> Arc<ConfigService> {
        let settings = NodeSettings {
            name: "TestCfg".to_string(),
            workdir: dir.to_path_buf(),
            self_url: MASTER_URL.to_string(),
            master_url: MASTER_URL.to_string(),
            ..NodeSettings::default()
        };
        let store = Arc::new(crate::store::ConfigStore::new(&settings).unwrap());
        Arc::new(ConfigService::new(store, &settings).unwrap())
    }

    fn slave_refresher(
        dir: &Path,
        master: &Arc<ConfigService>,
        down: &[&str],
        auto_publish: bool,
    ) -> Refresher {
        let settings = NodeSettings {
            name: "TestCfg".to_string(),
            workdir: dir.to_path_buf(),
            self_url: SLAVE_URL.to_string(),
            master_url: MASTER_URL.to_string(),
            ..NodeSettings::default()
        };
        let store = Arc::new(crate::store::ConfigStore::new(&settings).unwrap());
        let connector = Arc::new(TestConnector {
            master: Arc::clone(master),
            down: down.iter().map(|s| s.to_string()).collect(),
        });
        Refresher::new(
            store,
            connector,
            RefreshConfig {
                master_url: MASTER_URL.to_string(),
                gateway_url: None,
                self_url: SLAVE_URL.to_string(),
                default_refresh_secs: 300,
                auto_publish,
            },
        )
    }

    #[tokio::test]
    async fn test_refresh_adopts_newer_version_and_fires_event() {
        let master_dir = TempDir::new().unwrap();
        let slave_dir = TempDir::new().unwrap();
        let master = master_service(master_dir.path());
        let refresher = slave_refresher(slave_dir.path(), &master, &[], false);
        let mut events = refresher.subscribe();

        let adopted = refresher.refresh(true).await.unwrap();
        assert_eq!(adopted, Some(master.get_version()));
        assert_eq!(refresher.store.current_version(), master.get_version());
        assert_eq!(events.recv().await.unwrap().version, master.get_version());
    }

    #[tokio::test]
    async fn test_refresh_noop_when_current() {
        let master_dir = TempDir::new().unwrap();
        let slave_dir = TempDir::new().unwrap();
        let master = master_service(master_dir.path());
        let refresher = slave_refresher(slave_dir.path(), &master, &[], false);

        refresher.refresh(true).await.unwrap();
        let mut events = refresher.subscribe();
        let again = refresher.refresh(true).await.unwrap();
        assert_eq!(again, None);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_refresh_is_noop() {
        let master_dir = TempDir::new().unwrap();
        let slave_dir = TempDir::new().unwrap();
        let master = master_service(master_dir.path());
        // Even with every server down a disabled refresher succeeds.
        let refresher =
            slave_refresher(slave_dir.path(), &master, &[MASTER_URL, SLAVE_URL], false);
        refresher.disable();
        assert_eq!(refresher.refresh(true).await.unwrap(), None);

        refresher.enable();
        assert!(refresher.refresh(true).await.is_err());
    }

    #[tokio::test]
    async fn test_all_failures_aggregated() {
        let master_dir = TempDir::new().unwrap();
        let slave_dir = TempDir::new().unwrap();
        let master = master_service(master_dir.path());
        let refresher = slave_refresher(slave_dir.path(), &master, &[MASTER_URL], false);

        let err = refresher.refresh(true).await.unwrap_err();
        match err {
            ConfigError::AllServersFailed(message) => {
                assert!(message.contains(MASTER_URL));
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_and_publish_registers_slave() {
        let master_dir = TempDir::new().unwrap();
        let slave_dir = TempDir::new().unwrap();
        let master = master_service(master_dir.path());
        let refresher = slave_refresher(slave_dir.path(), &master, &[], true);

        refresher.refresh_and_publish().await.unwrap();
        assert!(master
            .store()
            .servers()
            .contains(&SLAVE_URL.to_string()));
    }

    #[tokio::test]
    async fn test_candidate_selection() {
        let master_dir = TempDir::new().unwrap();
        let slave_dir = TempDir::new().unwrap();
        let master = master_service(master_dir.path());
        let refresher = slave_refresher(slave_dir.path(), &master, &[], false);

        // Forced master.
        assert_eq!(refresher.candidates(true), vec![MASTER_URL.to_string()]);

        // Peer mode excludes ourselves and falls back to the master when
        // nobody else is known.
        refresher.refresh(true).await.unwrap();
        let peers = refresher.candidates(false);
        assert!(!peers.contains(&SLAVE_URL.to_string()));
        assert!(!peers.is_empty());

        // A gateway override short-circuits everything.
        let mut config = refresher.config.clone();
        config.gateway_url = Some("tcp://gateway:9135".to_string());
        let gated = Refresher::new(
            Arc::clone(&refresher.store),
            Arc::clone(&refresher.connector),
            config,
        );
        assert_eq!(
            gated.candidates(false),
            vec!["tcp://gateway:9135".to_string()]
        );
        assert_eq!(
            gated.candidates(true),
            vec!["tcp://gateway:9135".to_string()]
        );
    }
}
