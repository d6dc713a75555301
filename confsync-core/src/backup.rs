//! Versioned on-disk backups
//!
//! Every accepted push is archived as an immutable single-member gzip
//! file named `<name>.<committer>@<version>.gz` next to the canonical
//! configuration file. The filename carries the whole commit record and
//! is parsed back by regex to reconstruct history; the gzip member name
//! holds the version token.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use regex::Regex;
use tracing::debug;

use crate::codec::MAX_SNAPSHOT_BYTES;
use crate::error::{ConfigError, ConfigResult};

/// One archived commit, reconstructed from a backup filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub committer: String,
    pub version: String,
    pub path: PathBuf,
}

/// Append-only archive of configuration snapshots in one directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

/// Committer ids end up in filenames; collapse anything unsafe.
pub fn sanitize_committer(committer: &str) -> String {
    let cleaned: String = committer
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

impl BackupStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(name: &str, committer: &str, version: &str) -> String {
        format!("{name}.{committer}@{version}.gz")
    }

    /// Archive one snapshot. Backups are immutable: writing a version that
    /// is already archived is an error, never an overwrite.
    pub fn write_backup(
        &self,
        name: &str,
        committer: &str,
        version: &str,
        text: &str,
    ) -> ConfigResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let committer = sanitize_committer(committer);
        let file_name = Self::file_name(name, &committer, version);
        let path = self.dir.join(&file_name);
        if path.exists() {
            return Err(ConfigError::Internal(format!(
                "backup {file_name} already exists"
            )));
        }

        let tmp = self.dir.join(format!(".{file_name}.tmp"));
        let file = File::create(&tmp)?;
        let mut encoder = GzBuilder::new()
            .filename(version)
            .write(file, Compression::default());
        encoder.write_all(text.as_bytes())?;
        encoder.finish()?;
        fs::rename(&tmp, &path)?;

        debug!("archived backup {}", file_name);
        Ok(path)
    }

    /// All archived commits for a configuration, newest first.
    pub fn entries(&self, name: &str) -> ConfigResult<Vec<BackupEntry>> {
        let pattern = format!(
            r"^{}\.(.+)@([0-9:. \-]+)\.gz$",
            regex::escape(name)
        );
        let re = Regex::new(&pattern)
            .map_err(|e| ConfigError::Internal(format!("bad backup pattern: {e}")))?;

        let mut entries = Vec::new();
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        for item in dir {
            let item = item?;
            let file_name = item.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(caps) = re.captures(file_name) {
                entries.push(BackupEntry {
                    committer: caps[1].to_string(),
                    version: caps[2].to_string(),
                    path: item.path(),
                });
            }
        }
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(entries)
    }

    /// Newest `limit` commits (all of them when `limit` is 0).
    pub fn history(&self, name: &str, limit: usize) -> ConfigResult<Vec<BackupEntry>> {
        let mut entries = self.entries(name)?;
        if limit > 0 {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Decompressed snapshot text for the newest version matching the
    /// given prefix. The prefix may be coarser than a full token, e.g. a
    /// plain date.
    pub fn version_contents(&self, name: &str, version_prefix: &str) -> ConfigResult<String> {
        let entry = self
            .entries(name)?
            .into_iter()
            .find(|entry| entry.version.starts_with(version_prefix))
            .ok_or_else(|| {
                ConfigError::NotFound(format!("no backup matching version {version_prefix:?}"))
            })?;
        self.read_entry(&entry)
    }

    /// Decompress one archived snapshot.
    pub fn read_entry(&self, entry: &BackupEntry) -> ConfigResult<String> {
        let file = File::open(&entry.path)?;
        let mut decoder = GzDecoder::new(file).take(MAX_SNAPSHOT_BYTES + 1);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| ConfigError::Compression(e.to_string()))?;
        if text.len() as u64 > MAX_SNAPSHOT_BYTES {
            return Err(ConfigError::Compression(
                "backup exceeds decompressed size cap".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path());
        store
            .write_backup("TestCfg", "alice@prod", "2026-08-07 10:00:00.000001", "a = 1\n")
            .unwrap();
        let text = store
            .version_contents("TestCfg", "2026-08-07 10:00:00.000001")
            .unwrap();
        assert_eq!(text, "a = 1\n");
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path());
        store
            .write_backup("TestCfg", "alice", "2026-08-07 10:00:00.000001", "a = 1\n")
            .unwrap();
        store
            .write_backup("TestCfg", "bob", "2026-08-07 10:00:02.000001", "a = 2\n")
            .unwrap();
        store
            .write_backup("TestCfg", "carol", "2026-08-07 10:00:04.000001", "a = 3\n")
            .unwrap();
        // A different configuration in the same directory is ignored.
        store
            .write_backup("OtherCfg", "mallory", "2026-08-07 10:00:05.000001", "x = 9\n")
            .unwrap();

        let history = store.history("TestCfg", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].committer, "carol");
        assert_eq!(history[1].committer, "bob");
    }

    #[test]
    fn test_version_prefix_match_picks_newest() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path());
        store
            .write_backup("TestCfg", "alice", "2026-08-07 10:00:00.000001", "a = 1\n")
            .unwrap();
        store
            .write_backup("TestCfg", "bob", "2026-08-07 11:00:00.000001", "a = 2\n")
            .unwrap();
        let text = store.version_contents("TestCfg", "2026-08-07").unwrap();
        assert_eq!(text, "a = 2\n");
        assert!(store.version_contents("TestCfg", "2025-").is_err());
    }

    #[test]
    fn test_backups_are_immutable() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path());
        let version = "2026-08-07 10:00:00.000001";
        store
            .write_backup("TestCfg", "alice", version, "a = 1\n")
            .unwrap();
        assert!(store
            .write_backup("TestCfg", "alice", version, "a = 2\n")
            .is_err());
        assert_eq!(
            store.version_contents("TestCfg", version).unwrap(),
            "a = 1\n"
        );
    }

    #[test]
    fn test_committer_sanitization() {
        assert_eq!(
            sanitize_committer("alice@prod - /DC=org/CN=alice"),
            "alice@prod_-__DC=org_CN=alice"
        );
        assert_eq!(sanitize_committer(""), "unknown");
    }

    #[test]
    fn test_empty_directory_has_no_history() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("missing"));
        assert!(store.history("TestCfg", 0).unwrap().is_empty());
    }
}
