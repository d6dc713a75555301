//! Authoritative configuration state for one process
//!
//! `ConfigStore` owns the live tree plus its replication metadata and
//! guards every compound mutation with one process-wide lock, so that two
//! concurrent pushes can never interleave a tree replacement from one
//! with a version bump from the other.
//!
//! Metadata travels inside the tree itself under the `Sync` section
//! (`Sync/Name`, `Sync/Version`, `Sync/Servers`, ...), which makes every
//! wire snapshot self-describing: the push validation reads the incoming
//! snapshot's own version and name.

use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backup::BackupStore;
use crate::codec;
use crate::error::{ConfigError, ConfigResult};
use crate::settings::NodeSettings;
use crate::tree::CfgTree;

/// Tree paths of the replication metadata.
pub const NAME_PATH: &str = "Sync/Name";
pub const VERSION_PATH: &str = "Sync/Version";
pub const SERVERS_PATH: &str = "Sync/Servers";
pub const REFRESH_TIME_PATH: &str = "Sync/RefreshTime";
pub const GRACE_TIME_PATH: &str = "Sync/GraceTime";

/// Version tokens are UTC timestamps with microsecond resolution; the
/// fixed-width rendering makes lexicographic order chronological.
const VERSION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// In-memory authoritative copy of the configuration.
pub struct ConfigStore {
    tree: Mutex<CfgTree>,
    /// Configuration identity. Fixed for masters; a slave booting without
    /// one adopts the master's on first refresh.
    name: RwLock<String>,
    backups: BackupStore,
    etc_dir: PathBuf,
    is_master: bool,
    self_url: String,
}

fn next_version(current: &str) -> String {
    let now = Utc::now().format(VERSION_FORMAT).to_string();
    if current.is_empty() || now.as_str() > current {
        return now;
    }
    // Wall clock has not moved past the last issued token; nudge by one
    // microsecond to keep the sequence strictly increasing.
    match NaiveDateTime::parse_from_str(current, VERSION_FORMAT) {
        Ok(dt) => (dt + TimeDelta::microseconds(1))
            .format(VERSION_FORMAT)
            .to_string(),
        Err(_) => now,
    }
}

impl ConfigStore {
    pub fn new(settings: &NodeSettings) -> ConfigResult<Self> {
        let etc_dir = settings.etc_dir();
        let mut tree = CfgTree::new();
        if !settings.name.trim().is_empty() {
            tree.set_option_at(NAME_PATH, settings.name.trim())?;
        }
        tree.set_option_at(SERVERS_PATH, &settings.master_url)?;

        Ok(Self {
            tree: Mutex::new(tree),
            name: RwLock::new(settings.name.trim().to_string()),
            backups: BackupStore::new(&etc_dir),
            etc_dir,
            is_master: settings.is_master(),
            self_url: settings.self_url.clone(),
        })
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    fn current_file(&self) -> PathBuf {
        self.etc_dir.join(format!("{}.cfg", self.name()))
    }

    /// Load the last-known-good local copy, if any.
    pub fn load(&self) -> ConfigResult<bool> {
        let path = self.current_file();
        if !path.exists() {
            info!("no local configuration at {}, starting empty", path.display());
            return Ok(false);
        }
        let text = fs::read_to_string(&path)?;
        let tree = CfgTree::from_text(&text)
            .map_err(|e| ConfigError::BadSnapshot(format!("{}: {e}", path.display())))?;
        let name = self.name();
        if let Some(stored) = tree.option_value(NAME_PATH) {
            if !name.is_empty() && stored != name {
                return Err(ConfigError::NameMismatch {
                    expected: name,
                    got: stored.to_string(),
                });
            }
        }
        *self.tree.lock() = tree;
        info!("loaded configuration from {}", path.display());
        Ok(true)
    }

    pub fn current_version(&self) -> String {
        self.tree
            .lock()
            .option_value(VERSION_PATH)
            .unwrap_or_default()
            .to_string()
    }

    pub fn servers(&self) -> Vec<String> {
        self.tree
            .lock()
            .option_as_list(SERVERS_PATH)
            .unwrap_or_default()
    }

    /// Slave refresh period as published in the tree, if any.
    pub fn published_refresh_secs(&self) -> Option<u64> {
        let value = self.tree.lock().option_as_i64(REFRESH_TIME_PATH)?;
        u64::try_from(value).ok()
    }

    /// Slave grace period as published in the tree, if any.
    pub fn published_grace_secs(&self) -> Option<u64> {
        let value = self.tree.lock().option_as_i64(GRACE_TIME_PATH)?;
        u64::try_from(value).ok()
    }

    pub fn snapshot_text(&self) -> String {
        self.tree.lock().to_text()
    }

    /// Clone of the live tree for read-only inspection.
    pub fn tree_copy(&self) -> CfgTree {
        self.tree.lock().clone()
    }

    pub fn compressed_snapshot(&self) -> ConfigResult<Vec<u8>> {
        codec::compress(&self.snapshot_text())
    }

    /// Compressed snapshot, but only if the live version is strictly
    /// newer than the caller's.
    pub fn compressed_snapshot_if_newer(&self, version: &str) -> ConfigResult<Option<Vec<u8>>> {
        let guard = self.tree.lock();
        let current = guard.option_value(VERSION_PATH).unwrap_or_default();
        if current > version {
            let data = codec::compress(&guard.to_text())?;
            Ok(Some(data))
        } else {
            Ok(None)
        }
    }

    /// Master-side atomic apply: replace the tree with a validated
    /// incoming snapshot, bump the version, persist current file and
    /// backup. The optimistic-concurrency check runs under the same lock:
    /// when `expected_version` is given and no longer matches the live
    /// version, the push is rejected untouched. On persistence failure
    /// the in-memory state is rolled back to the pre-apply tree before
    /// the error is returned, so memory never runs ahead of disk.
    pub fn apply_snapshot(
        &self,
        mut tree: CfgTree,
        committer: &str,
        expected_version: Option<&str>,
    ) -> ConfigResult<String> {
        let name = self.name();
        if name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        let mut guard = self.tree.lock();
        let old = guard.clone();
        let current = old.option_value(VERSION_PATH).unwrap_or_default();
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(ConfigError::VersionMismatch {
                    expected: current.to_string(),
                    got: expected.to_string(),
                });
            }
        }
        let new_version = next_version(current);
        tree.set_option_at(NAME_PATH, &name)?;
        tree.set_option_at(VERSION_PATH, &new_version)?;
        *guard = tree;
        match self.persist_locked(&guard, &name, committer, &new_version) {
            Ok(()) => {
                info!(version = %new_version, committer, "applied configuration snapshot");
                Ok(new_version)
            }
            Err(e) => {
                *guard = old;
                warn!("persistence failed, rolled back in-memory state: {e}");
                Err(e)
            }
        }
    }

    /// Master-side server-list mutation in one critical section: apply
    /// the closure to the list and, if it reports a change, bump the
    /// version and persist. Returns the new version when bumped.
    pub fn mutate_servers<F>(&self, committer: &str, mutate: F) -> ConfigResult<Option<String>>
    where
        F: FnOnce(&mut Vec<String>) -> bool,
    {
        let name = self.name();
        if name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        let mut guard = self.tree.lock();
        let mut servers = guard.option_as_list(SERVERS_PATH).unwrap_or_default();
        if !mutate(&mut servers) {
            return Ok(None);
        }
        let old = guard.clone();
        let current = old.option_value(VERSION_PATH).unwrap_or_default();
        let new_version = next_version(current);
        guard.set_option_at(SERVERS_PATH, servers.join(", "))?;
        guard.set_option_at(VERSION_PATH, &new_version)?;
        match self.persist_locked(&guard, &name, committer, &new_version) {
            Ok(()) => {
                info!(version = %new_version, "server list updated: {}", servers.join(", "));
                Ok(Some(new_version))
            }
            Err(e) => {
                *guard = old;
                warn!("persistence failed, rolled back in-memory state: {e}");
                Err(e)
            }
        }
    }

    /// Master boot: make sure the tree carries a version and lists this
    /// node first among the servers; persist once if anything changed.
    pub fn master_init(&self, committer: &str) -> ConfigResult<Option<String>> {
        let name = self.name();
        if name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        let mut guard = self.tree.lock();
        let old = guard.clone();
        let mut changed = false;

        let mut servers = guard.option_as_list(SERVERS_PATH).unwrap_or_default();
        if servers.first().map(String::as_str) != Some(self.self_url.as_str()) {
            servers.retain(|url| url != &self.self_url);
            servers.insert(0, self.self_url.clone());
            guard.set_option_at(SERVERS_PATH, servers.join(", "))?;
            changed = true;
        }
        if guard.option_value(NAME_PATH) != Some(name.as_str()) {
            guard.set_option_at(NAME_PATH, &name)?;
            changed = true;
        }
        let missing_version = guard.option_value(VERSION_PATH).unwrap_or_default().is_empty();
        if !(changed || missing_version) {
            return Ok(None);
        }

        let current = old.option_value(VERSION_PATH).unwrap_or_default();
        let new_version = next_version(current);
        guard.set_option_at(VERSION_PATH, &new_version)?;
        match self.persist_locked(&guard, &name, committer, &new_version) {
            Ok(()) => {
                info!(version = %new_version, "master configuration initialized");
                Ok(Some(new_version))
            }
            Err(e) => {
                *guard = old;
                Err(e)
            }
        }
    }

    /// Slave-side adoption of a snapshot pulled from a peer. Replaces the
    /// tree when the incoming version is strictly newer; the local file
    /// write is best-effort cache maintenance.
    pub fn adopt_snapshot(&self, tree: CfgTree) -> ConfigResult<Option<String>> {
        let incoming_name = tree
            .option_value(NAME_PATH)
            .ok_or_else(|| ConfigError::BadSnapshot("snapshot carries no name".to_string()))?
            .to_string();
        let incoming_version = tree
            .option_value(VERSION_PATH)
            .ok_or_else(|| ConfigError::BadSnapshot("snapshot carries no version".to_string()))?
            .to_string();

        let local_name = self.name();
        if local_name.is_empty() {
            *self.name.write() = incoming_name.clone();
        } else if incoming_name != local_name {
            return Err(ConfigError::NameMismatch {
                expected: local_name,
                got: incoming_name,
            });
        }

        let mut guard = self.tree.lock();
        let current = guard.option_value(VERSION_PATH).unwrap_or_default();
        if incoming_version.as_str() <= current {
            return Ok(None);
        }
        let text = tree.to_text();
        *guard = tree;
        drop(guard);

        if let Err(e) = self.write_current(&text) {
            warn!("failed to cache adopted configuration locally: {e}");
        }
        debug!(version = %incoming_version, "adopted newer configuration");
        Ok(Some(incoming_version))
    }

    fn persist_locked(
        &self,
        tree: &CfgTree,
        name: &str,
        committer: &str,
        version: &str,
    ) -> ConfigResult<()> {
        let text = tree.to_text();
        let backup_path = self.backups.write_backup(name, committer, version, &text)?;
        if let Err(e) = self.write_current(&text) {
            // The backup chain must not record a version that was never
            // current; drop the orphan before reporting the failure.
            if let Err(cleanup) = fs::remove_file(&backup_path) {
                warn!("failed to remove orphan backup {}: {cleanup}", backup_path.display());
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_current(&self, text: &str) -> ConfigResult<()> {
        fs::create_dir_all(&self.etc_dir)?;
        let path = self.current_file();
        let tmp = self.etc_dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("current.cfg")
        ));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
