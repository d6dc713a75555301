//! Client-side edit session
//!
//! A `Modificator` owns a private working copy of the tree, applies
//! local edits to it, and pushes the whole thing back as a replacement
//! snapshot. Every mutation stamps the touched node with the session's
//! committer identity; a node only ever remembers its most recent
//! committer, the full history lives in the server's backup chain.
//!
//! There is no retry logic here on purpose: a rejected push surfaces as
//! a structured error and the caller decides whether to rebase via
//! [`Modificator::merge_with_server`] and push again.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::client::ConfigChannel;
use crate::codec;
use crate::diff::{line_diff, render_diff};
use crate::error::{ConfigError, ConfigResult};
use crate::protocol::HistoryEntry;
use crate::store::VERSION_PATH;
use crate::tree::{CfgTree, TreeError};

/// One edit session against a remote configuration service.
pub struct Modificator {
    tree: CfgTree,
    committer: String,
    channel: Arc<dyn ConfigChannel>,
}

fn split_parent(path: &str) -> ConfigResult<(&str, &str)> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::Tree(TreeError::BadName(path.to_string())));
    }
    match trimmed.rfind('/') {
        Some(idx) => Ok((&trimmed[..idx], &trimmed[idx + 1..])),
        None => Ok(("", trimmed)),
    }
}

impl Modificator {
    pub fn new(channel: Arc<dyn ConfigChannel>, committer: impl Into<String>) -> Self {
        Self {
            tree: CfgTree::new(),
            committer: committer.into(),
            channel,
        }
    }

    /// Ask the service who we are and adopt that as committer identity.
    pub async fn load_identity(&mut self) -> ConfigResult<()> {
        let credentials = self.channel.whoami().await?;
        self.committer = credentials.committer_id();
        Ok(())
    }

    pub fn committer(&self) -> &str {
        &self.committer
    }

    /// Read-only view of the working copy.
    pub fn tree(&self) -> &CfgTree {
        &self.tree
    }

    pub fn dump(&self) -> String {
        self.tree.to_text()
    }

    /// Version the working copy is based on.
    pub fn base_version(&self) -> String {
        self.tree
            .option_value(VERSION_PATH)
            .unwrap_or_default()
            .to_string()
    }

    /// Fetch the full remote snapshot into a fresh working copy.
    pub async fn load_from_remote(&mut self) -> ConfigResult<String> {
        let data = self.channel.get_compressed_data().await?;
        let text = codec::decompress(&data)?;
        self.tree =
            CfgTree::from_text(&text).map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        let version = self.base_version();
        debug!(version = %version, "loaded remote configuration");
        Ok(version)
    }

    pub fn load_from_buffer(&mut self, text: &str) -> ConfigResult<()> {
        self.tree =
            CfgTree::from_text(text).map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        Ok(())
    }

    pub fn load_from_file(&mut self, path: &Path) -> ConfigResult<()> {
        let text = std::fs::read_to_string(path)?;
        self.load_from_buffer(&text)
    }

    /// Merge a local file over the working copy (the file wins).
    pub fn merge_from_file(&mut self, path: &Path) -> ConfigResult<()> {
        let text = std::fs::read_to_string(path)?;
        let other =
            CfgTree::from_text(&text).map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        self.tree = self.tree.merge(&other);
        Ok(())
    }

    pub fn sections(&self, path: &str) -> ConfigResult<Vec<String>> {
        self.tree
            .subtree(path)
            .map(|tree| tree.sections())
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))
    }

    pub fn options(&self, path: &str) -> ConfigResult<Vec<String>> {
        self.tree
            .subtree(path)
            .map(|tree| tree.options())
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))
    }

    pub fn value(&self, path: &str) -> Option<String> {
        self.tree.option_value(path).map(str::to_string)
    }

    pub fn comment(&self, path: &str) -> Option<String> {
        self.tree.node_at(path).map(|node| node.comment.clone())
    }

    /// Existence checks never fail: any unresolved path is just `false`.
    pub fn exists_section(&self, path: &str) -> bool {
        self.tree
            .node_at(path)
            .map(|node| node.is_section())
            .unwrap_or(false)
    }

    pub fn exists_option(&self, path: &str) -> bool {
        self.tree
            .node_at(path)
            .map(|node| !node.is_section())
            .unwrap_or(false)
    }

    fn stamp(&mut self, path: &str) {
        if let Some((parent, leaf)) = self.tree.resolve_parent_mut(path) {
            let _ = parent.set_last_committer(leaf, &self.committer);
        }
    }

    /// Create a section (and any missing parents), stamping it.
    pub fn create_section(&mut self, path: &str) -> ConfigResult<()> {
        let (parent_path, leaf) = split_parent(path)?;
        let parent = self.tree.make_path(parent_path)?;
        parent.create_section(leaf)?;
        self.stamp(path);
        Ok(())
    }

    /// Set an option value (creating missing parents), stamping it.
    pub fn set_option(&mut self, path: &str, value: impl Into<String>) -> ConfigResult<()> {
        let (parent_path, leaf) = split_parent(path)?;
        let parent = self.tree.make_path(parent_path)?;
        parent.set_option(leaf, value)?;
        self.stamp(path);
        Ok(())
    }

    /// Replace a node's comment, stamping it. Returns whether the text
    /// actually changed.
    pub fn set_comment(&mut self, path: &str, text: &str) -> ConfigResult<bool> {
        let (parent, leaf) = self
            .tree
            .resolve_parent_mut(path)
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))?;
        let changed = parent.set_comment(leaf, text)?;
        self.stamp(path);
        Ok(changed)
    }

    /// Rename the node at `path` to `new_name` within its parent.
    pub fn rename_key(&mut self, path: &str, new_name: &str) -> ConfigResult<()> {
        let (parent, leaf) = self
            .tree
            .resolve_parent_mut(path)
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))?;
        parent.rename(leaf, new_name)?;
        let (parent_path, _) = split_parent(path)?;
        let new_path = if parent_path.is_empty() {
            new_name.to_string()
        } else {
            format!("{parent_path}/{new_name}")
        };
        self.stamp(&new_path);
        Ok(())
    }

    /// Clone the node at `path` (with its subtree and comments) under
    /// `new_name` within the same parent.
    pub fn copy_key(&mut self, path: &str, new_name: &str) -> ConfigResult<()> {
        let (parent, leaf) = self
            .tree
            .resolve_parent_mut(path)
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))?;
        parent.copy(leaf, new_name)?;
        let (parent_path, _) = split_parent(path)?;
        let new_path = if parent_path.is_empty() {
            new_name.to_string()
        } else {
            format!("{parent_path}/{new_name}")
        };
        self.stamp(&new_path);
        Ok(())
    }

    pub fn remove_option(&mut self, path: &str) -> ConfigResult<()> {
        let (parent, leaf) = self
            .tree
            .resolve_parent_mut(path)
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))?;
        match parent.get(leaf) {
            Some(node) if !node.is_section() => {
                parent.delete(leaf)?;
                Ok(())
            }
            Some(_) => Err(ConfigError::Tree(TreeError::NotAnOption(path.to_string()))),
            None => Err(ConfigError::NotFound(path.to_string())),
        }
    }

    pub fn remove_section(&mut self, path: &str) -> ConfigResult<()> {
        let (parent, leaf) = self
            .tree
            .resolve_parent_mut(path)
            .ok_or_else(|| ConfigError::NotFound(path.to_string()))?;
        match parent.get(leaf) {
            Some(node) if node.is_section() => {
                parent.delete(leaf)?;
                Ok(())
            }
            Some(_) => Err(ConfigError::Tree(TreeError::NotASection(path.to_string()))),
            None => Err(ConfigError::NotFound(path.to_string())),
        }
    }

    /// Push the working copy as a complete replacement snapshot. The
    /// service performs all staleness validation.
    pub async fn commit(&self) -> ConfigResult<String> {
        let data = codec::compress(&self.tree.to_text())?;
        self.channel.commit_new_data(data, false).await
    }

    /// Rebase the working copy onto the latest remote state: the remote
    /// tree wins every conflict, local-only edits ride on top, and the
    /// remote's version becomes the new base.
    pub async fn merge_with_server(&mut self) -> ConfigResult<String> {
        let data = self.channel.get_compressed_data().await?;
        let text = codec::decompress(&data)?;
        let remote =
            CfgTree::from_text(&text).map_err(|e| ConfigError::BadSnapshot(e.to_string()))?;
        self.tree = self.tree.merge(&remote);
        let version = self.base_version();
        debug!(version = %version, "rebased working copy onto remote");
        Ok(version)
    }

    pub async fn history(&self, limit: usize) -> ConfigResult<Vec<HistoryEntry>> {
        self.channel.get_commit_history(limit).await
    }

    /// Line diff between two stored versions.
    pub async fn version_diff(&self, from: &str, to: &str) -> ConfigResult<String> {
        let left = codec::decompress(&self.channel.get_version_contents(from).await?)?;
        let right = codec::decompress(&self.channel.get_version_contents(to).await?)?;
        Ok(render_diff(&line_diff(&left, &right), false))
    }

    /// Line diff between the live remote state and the working copy.
    pub async fn current_diff(&self) -> ConfigResult<String> {
        let remote = codec::decompress(&self.channel.get_compressed_data().await?)?;
        Ok(render_diff(&line_diff(&remote, &self.tree.to_text()), false))
    }

    /// Ask the service to restore a stored version as the new current
    /// state; purely a pass-through.
    pub async fn rollback_to_version(&self, version: &str) -> ConfigResult<String> {
        self.channel.rollback_to_version(version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Credentials, ErrorKind, Request, Response};
    use crate::service::ConfigService;
    use crate::settings::NodeSettings;
    use crate::store::ConfigStore;
    use crate::tree::COMMITTER_TAG;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// In-process channel driving a service directly.
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

    fn service(dir: &std::path::Path) -> Arc<ConfigService> {
        let settings = NodeSettings {
            name: "TestCfg".to_string(),
            workdir: dir.to_path_buf(),
            ..NodeSettings::default()
        };
        let store = Arc::new(ConfigStore::new(&settings).unwrap());
        Arc::new(ConfigService::new(store, &settings).unwrap())
    }

    fn session(service: &Arc<ConfigService>, user: &str) -> Modificator {
        let credentials = Credentials::new(user, "prod", format!("/DC=org/CN={user}"));
        let committer = credentials.committer_id();
        let channel = Arc::new(LoopbackChannel {
            service: Arc::clone(service),
            credentials,
        });
        Modificator::new(channel, committer)
    }

    #[tokio::test]
    async fn test_edit_and_commit() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());
        let mut session = session(&service, "alice");

        session.load_from_remote().await.unwrap();
        session.create_section("Resources/SE1").unwrap();
        session.set_option("Resources/SE1/Status", "Active").unwrap();
        let version = session.commit().await.unwrap();

        assert_eq!(service.get_version(), version);
        assert_eq!(
            service.store().tree_copy().option_value("Resources/SE1/Status"),
            Some("Active")
        );
    }

    #[tokio::test]
    async fn test_mutations_stamp_most_recent_committer_only() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());

        let mut alice = session(&service, "alice");
        alice.load_from_remote().await.unwrap();
        alice.set_option("Resources/SE1/Status", "Active").unwrap();
        alice.commit().await.unwrap();

        let mut bob = session(&service, "bob");
        bob.load_from_remote().await.unwrap();
        bob.set_option("Resources/SE1/Status", "Banned").unwrap();

        let node = bob.tree().node_at("Resources/SE1/Status").unwrap();
        assert_eq!(
            node.last_committer.as_deref(),
            Some("bob@prod - /DC=org/CN=bob")
        );

        // Exactly one tag line in the serialized form, and the previous
        // committer's tag is gone (alice only ever touched this node).
        let dump = bob.dump();
        let tag_lines: Vec<&str> = dump
            .lines()
            .filter(|line| line.trim_start().starts_with(&format!("#{COMMITTER_TAG}bob")))
            .collect();
        assert_eq!(tag_lines.len(), 1);
        assert!(!dump.contains(&format!("{COMMITTER_TAG}alice")));
    }

    #[tokio::test]
    async fn test_exists_checks_never_fail() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());
        let mut session = session(&service, "alice");
        session.load_from_remote().await.unwrap();

        assert!(!session.exists_section("No/Such/Path"));
        assert!(!session.exists_option("No/Such/Option"));
        session.set_option("A/B/C", "1").unwrap();
        assert!(session.exists_section("A/B"));
        assert!(session.exists_option("A/B/C"));
        assert!(!session.exists_option("A/B"));
    }

    #[tokio::test]
    async fn test_stale_commit_rejected_then_merge_and_retry() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());

        // Both sessions load the same base version.
        let mut alice = session(&service, "alice");
        alice.load_from_remote().await.unwrap();
        let mut bob = session(&service, "bob");
        bob.load_from_remote().await.unwrap();

        alice.set_option("Resources/SE1/Status", "Active").unwrap();
        let v1 = alice.commit().await.unwrap();

        bob.set_option("Resources/SE2/Status", "Probing").unwrap();
        let err = bob.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionMismatch);
        assert!(err.is_retryable());

        // Rebase on the latest remote and push again.
        let adopted = bob.merge_with_server().await.unwrap();
        assert_eq!(adopted, v1);
        let v2 = bob.commit().await.unwrap();
        assert!(v2 > v1);

        let tree = service.store().tree_copy();
        assert_eq!(tree.option_value("Resources/SE1/Status"), Some("Active"));
        assert_eq!(tree.option_value("Resources/SE2/Status"), Some("Probing"));
    }

    #[tokio::test]
    async fn test_rename_copy_remove() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());
        let mut session = session(&service, "alice");
        session.load_from_remote().await.unwrap();

        session.set_option("Resources/SE1/Status", "Active").unwrap();
        session.copy_key("Resources/SE1", "SE2").unwrap();
        session.rename_key("Resources/SE1", "SE0").unwrap();
        assert!(session.exists_section("Resources/SE0"));
        assert!(session.exists_section("Resources/SE2"));
        assert!(!session.exists_section("Resources/SE1"));

        session.remove_option("Resources/SE2/Status").unwrap();
        assert!(!session.exists_option("Resources/SE2/Status"));
        session.remove_section("Resources/SE2").unwrap();
        assert!(!session.exists_section("Resources/SE2"));

        // Kind mismatches are structured errors.
        assert!(session.remove_section("Resources/SE0/Status").is_err());
        assert!(session.remove_option("Resources/SE0").is_err());
    }

    #[tokio::test]
    async fn test_current_diff_shows_local_edit() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());
        let mut session = session(&service, "alice");
        session.load_from_remote().await.unwrap();
        session.set_option("LogLevel", "DEBUG").unwrap();

        let diff = session.current_diff().await.unwrap();
        assert!(diff.contains("+ LogLevel = DEBUG"));
    }

    #[tokio::test]
    async fn test_history_and_version_diff() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path());

        let mut session = session(&service, "alice");
        session.load_from_remote().await.unwrap();
        session.set_option("Phase", "one").unwrap();
        let v1 = session.commit().await.unwrap();

        session.merge_with_server().await.unwrap();
        session.set_option("Phase", "two").unwrap();
        let v2 = session.commit().await.unwrap();

        let history = session.history(0).await.unwrap();
        assert!(history.len() >= 3); // boot + two commits
        assert_eq!(history[0].version, v2);

        let diff = session.version_diff(&v1, &v2).await.unwrap();
        assert!(diff.contains("- Phase = one") || diff.contains("-   Phase = one"));
        assert!(diff.contains("Phase = two"));
    }
}
