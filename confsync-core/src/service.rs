//! Master/slave configuration service
//!
//! The service front-ends a [`ConfigStore`]: it validates pushed
//! snapshots (optimistic version equality plus configuration-name
//! equality), tracks live slave replicas with a grace-time heartbeat
//! table, serves history queries from the backup archive, and answers
//! the read-only snapshot RPCs on both roles. Write acceptance exists
//! only in master mode; every mutating request on a slave is rejected
//! with a structured not-master error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{ConfigError, ConfigResult};
use crate::protocol::{Credentials, HistoryEntry, Request, Response};
use crate::settings::NodeSettings;
use crate::store::{ConfigStore, NAME_PATH, VERSION_PATH};
use crate::tree::CfgTree;

/// Committer identity used for server-originated mutations (boot
/// initialization, server-list housekeeping).
pub const SERVER_COMMITTER: &str = "server";

/// RPC-facing service over one configuration store.
pub struct ConfigService {
    store: Arc<ConfigStore>,
    /// URL -> last heartbeat, master only.
    liveness: Mutex<HashMap<String, Instant>>,
    default_grace: Duration,
}

impl ConfigService {
    /// Build the service. In master mode this runs the boot sequence:
    /// the store must carry a name (fatal otherwise), gets an initial
    /// version and backup if it has none, and lists this node first in
    /// the server list.
    pub fn new(store: Arc<ConfigStore>, settings: &NodeSettings) -> ConfigResult<Self> {
        if store.is_master() {
            store.master_init(SERVER_COMMITTER)?;
        }
        Ok(Self {
            store,
            liveness: Mutex::new(HashMap::new()),
            default_grace: Duration::from_secs(settings.grace_secs),
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn get_version(&self) -> String {
        self.store.current_version()
    }

    pub fn get_compressed_data(&self) -> ConfigResult<Vec<u8>> {
        self.store.compressed_snapshot()
    }

    pub fn get_compressed_data_if_newer(&self, version: &str) -> ConfigResult<Option<Vec<u8>>> {
        self.store.compressed_snapshot_if_newer(version)
    }

    /// The core mutating RPC: accept a complete replacement snapshot.
    ///
    /// The snapshot must parse, carry the exact configuration name of
    /// this deployment, and (unless the caller asked to adopt the
    /// server's version) be based on the exact live version. Stale
    /// pushes are rejected, never merged.
    pub fn update_configuration(
        &self,
        data: &[u8],
        committer: &str,
        adopt_remote_version: bool,
    ) -> ConfigResult<String> {
        if !self.store.is_master() {
            return Err(ConfigError::NotMaster);
        }
        let text = codec::decompress(data)?;
        let mut tree = CfgTree::from_text(&text)
            .map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;

        if adopt_remote_version {
            tree.set_option_at(VERSION_PATH, self.store.current_version())
                .map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        }

        let name = self.store.name();
        let incoming_name = tree.option_value(NAME_PATH).unwrap_or_default().to_string();
        if incoming_name != name {
            return Err(ConfigError::NameMismatch {
                expected: name,
                got: incoming_name,
            });
        }
        let incoming_version = tree
            .option_value(VERSION_PATH)
            .unwrap_or_default()
            .to_string();

        self.store
            .apply_snapshot(tree, committer, Some(&incoming_version))
    }

    /// Record or refresh a slave's heartbeat; a first sighting also adds
    /// it to the published server list, which bumps the version.
    pub fn publish_slave(&self, url: &str) -> ConfigResult<()> {
        if !self.store.is_master() {
            return Err(ConfigError::NotMaster);
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(ConfigError::Internal("empty slave URL".to_string()));
        }
        self.liveness.lock().insert(url.to_string(), Instant::now());
        let bumped = self.store.mutate_servers(SERVER_COMMITTER, |servers| {
            if servers.iter().any(|existing| existing == url) {
                false
            } else {
                servers.push(url.to_string());
                true
            }
        })?;
        if let Some(version) = bumped {
            info!(slave = url, version = %version, "registered new slave replica");
        } else {
            debug!(slave = url, "slave heartbeat refreshed");
        }
        Ok(())
    }

    /// Drop slaves whose last heartbeat is older than the grace period.
    /// Removal republishes the server list with a single version bump;
    /// an already-removed slave cannot expire again.
    pub fn purge_stale_slaves(&self) -> ConfigResult<usize> {
        self.purge_with_grace(self.effective_grace())
    }

    pub(crate) fn purge_with_grace(&self, grace: Duration) -> ConfigResult<usize> {
        let mut expired = Vec::new();
        {
            let mut liveness = self.liveness.lock();
            liveness.retain(|url, last_seen| {
                if last_seen.elapsed() > grace {
                    expired.push(url.clone());
                    false
                } else {
                    true
                }
            });
        }
        if expired.is_empty() {
            return Ok(0);
        }
        let bumped = self.store.mutate_servers(SERVER_COMMITTER, |servers| {
            let before = servers.len();
            servers.retain(|url| !expired.contains(url));
            servers.len() != before
        })?;
        if let Some(version) = bumped {
            info!(version = %version, "expired slaves removed: {}", expired.join(", "));
        }
        Ok(expired.len())
    }

    /// Grace period, preferring the value published in the tree.
    pub fn effective_grace(&self) -> Duration {
        self.store
            .published_grace_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.default_grace)
    }

    /// Newest commits from the backup archive.
    pub fn commit_history(&self, limit: usize) -> ConfigResult<Vec<HistoryEntry>> {
        if !self.store.is_master() {
            return Err(ConfigError::NotMaster);
        }
        let entries = self.store.backups().history(&self.store.name(), limit)?;
        Ok(entries
            .into_iter()
            .map(|entry| HistoryEntry {
                committer: entry.committer,
                version: entry.version,
            })
            .collect())
    }

    /// Stored snapshot for a version prefix, re-compressed for transport.
    pub fn version_contents(&self, version_prefix: &str) -> ConfigResult<Vec<u8>> {
        if !self.store.is_master() {
            return Err(ConfigError::NotMaster);
        }
        let text = self
            .store
            .backups()
            .version_contents(&self.store.name(), version_prefix)?;
        codec::compress(&text)
    }

    /// Restore a stored snapshot as the new current state. The restore
    /// runs through the normal apply path: fresh version, fresh backup.
    pub fn rollback_to_version(&self, version: &str, committer: &str) -> ConfigResult<String> {
        if !self.store.is_master() {
            return Err(ConfigError::NotMaster);
        }
        let text = self
            .store
            .backups()
            .version_contents(&self.store.name(), version)?;
        let tree = CfgTree::from_text(&text)
            .map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        let restored = self.store.apply_snapshot(tree, committer, None)?;
        info!(from = version, to = %restored, "configuration rolled back");
        Ok(restored)
    }

    /// Dispatch one framed request on behalf of an authenticated peer.
    pub fn handle(&self, peer: &Credentials, request: Request) -> Response {
        let result = match request {
            Request::Hello { .. } => Ok(Response::HelloAck),
            Request::WhoAmI => Ok(Response::Credentials {
                credentials: peer.clone(),
            }),
            Request::GetVersion => Ok(Response::Version {
                version: self.get_version(),
            }),
            Request::GetCompressedData => self
                .get_compressed_data()
                .map(|data| Response::CompressedData { data }),
            Request::GetCompressedDataIfNewer { version } => self
                .get_compressed_data_if_newer(&version)
                .map(|data| match data {
                    Some(data) => Response::CompressedData { data },
                    None => Response::UpToDate,
                }),
            Request::CommitNewData {
                data,
                adopt_remote_version,
            } => self
                .update_configuration(&data, &peer.committer_id(), adopt_remote_version)
                .map(|version| Response::Committed { version }),
            Request::PublishSlave { url } => {
                self.publish_slave(&url).map(|()| Response::Published)
            }
            Request::GetCommitHistory { limit } => self
                .commit_history(limit)
                .map(|entries| Response::CommitHistory { entries }),
            Request::GetVersionContents { version } => self
                .version_contents(&version)
                .map(|data| Response::CompressedData { data }),
            Request::RollbackToVersion { version } => self
                .rollback_to_version(&version, &peer.committer_id())
                .map(|version| Response::Committed { version }),
        };
        result.unwrap_or_else(|error| {
            let (kind, message) = error.to_wire();
            Response::Error { kind, message }
        })
    }

    /// Master-side housekeeping loop: purge stale slaves every grace
    /// period until shutdown. Failures are logged and the loop carries
    /// on at its next tick.
    pub fn spawn_housekeeping(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("slave liveness housekeeping started");
            loop {
                let period = self.effective_grace();
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        match self.purge_stale_slaves() {
                            Ok(0) => {}
                            Ok(count) => info!("housekeeping expired {count} slave(s)"),
                            Err(e) => warn!("housekeeping failed: {e}"),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("slave liveness housekeeping stopped");
                        break;
                    }
                }
            }
        })
    }
}
