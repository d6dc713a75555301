//! Node settings
//!
//! Per-process deployment settings loaded from a TOML file: identity of
//! the configuration, where it lives on disk, the node's own URL, and the
//! replication timers. Distinct from the replicated tree itself, which is
//! what the protocol ships around.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Deployment settings for one master or slave process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Configuration identity; must match between master and clients.
    pub name: String,
    /// Root directory; the canonical file and backups live in `<workdir>/etc`.
    pub workdir: PathBuf,
    /// TCP bind address for the service.
    pub bind_addr: String,
    /// URL under which peers reach this node.
    pub self_url: String,
    /// URL of the sole master.
    pub master_url: String,
    /// Optional gateway that overrides all other refresh candidates.
    pub gateway_url: Option<String>,
    /// Slave refresh period in seconds (the tree can override it).
    pub refresh_secs: u64,
    /// Master-side slave liveness grace period in seconds.
    pub grace_secs: u64,
    /// Whether a slave heartbeats itself back to the master.
    pub auto_publish: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "Main".to_string(),
            workdir: PathBuf::from("./confsync_data"),
            bind_addr: "0.0.0.0:9135".to_string(),
            self_url: "tcp://127.0.0.1:9135".to_string(),
            master_url: "tcp://127.0.0.1:9135".to_string(),
            gateway_url: None,
            refresh_secs: 300,
            grace_secs: 600,
            auto_publish: true,
        }
    }
}

impl NodeSettings {
    /// Load settings from a TOML file, writing defaults on first run.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let settings = Self::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address {:?}", self.bind_addr))?;
        if self.refresh_secs == 0 {
            anyhow::bail!("refresh_secs cannot be 0");
        }
        if self.grace_secs == 0 {
            anyhow::bail!("grace_secs cannot be 0");
        }
        if self.is_master() && self.name.trim().is_empty() {
            anyhow::bail!("a master node requires a configuration name");
        }
        Ok(())
    }

    /// Role is fixed by the master URL pointing at this very node.
    pub fn is_master(&self) -> bool {
        self.self_url == self.master_url
    }

    /// Directory holding the canonical file and the backup archives.
    pub fn etc_dir(&self) -> PathBuf {
        self.workdir.join("etc")
    }
}
