//! End-to-end replication tests over real TCP connections
//!
//! Boots a master service on an ephemeral port and drives it with edit
//! sessions and a slave refresher exactly the way deployed processes do.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::broadcast;

use confsync_core::client::{TcpChannel, TcpConnector};
use confsync_core::modificator::Modificator;
use confsync_core::net::Listener;
use confsync_core::protocol::{Credentials, ErrorKind};
use confsync_core::refresher::{RefreshConfig, Refresher};
use confsync_core::service::ConfigService;
use confsync_core::settings::NodeSettings;
use confsync_core::store::ConfigStore;

struct MasterHandle {
    service: Arc<ConfigService>,
    url: String,
    shutdown: broadcast::Sender<()>,
}

impl Drop for MasterHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

async fn start_master(dir: &Path) -> MasterHandle {
    let listener = Listener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("tcp://{}", listener.local_addr().unwrap());

    let settings = NodeSettings {
        name: "TestCfg".to_string(),
        workdir: dir.to_path_buf(),
        bind_addr: "127.0.0.1:0".to_string(),
        self_url: url.clone(),
        master_url: url.clone(),
        ..NodeSettings::default()
    };
    let store = Arc::new(ConfigStore::new(&settings).unwrap());
    store.load().unwrap();
    let service = Arc::new(ConfigService::new(store, &settings).unwrap());

    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(listener.serve(Arc::clone(&service), shutdown.subscribe()));

    MasterHandle {
        service,
        url,
        shutdown,
    }
}

fn session(url: &str, user: &str) -> Modificator {
    let credentials = Credentials::new(user, "prod", format!("/DC=org/CN={user}"));
    let committer = credentials.committer_id();
    let channel = Arc::new(TcpChannel::new(url, credentials));
    Modificator::new(channel, committer)
}

#[tokio::test]
async fn test_full_edit_conflict_merge_scenario() {
    let dir = TempDir::new().unwrap();
    let master = start_master(dir.path()).await;

    // (1) Master booted with an auto-generated version and one backup.
    let v0 = master.service.get_version();
    assert!(!v0.is_empty());

    // (2) Client A loads the snapshot, edits and pushes.
    let mut alice = session(&master.url, "alice");
    assert_eq!(alice.load_from_remote().await.unwrap(), v0);
    alice.create_section("Resources/SE1").unwrap();
    alice.set_option("Resources/SE1/Status", "Active").unwrap();
    let v1 = alice.commit().await.unwrap();
    assert!(v1 > v0);

    // (3) Two more clients load the same base; the second pusher is
    // rejected and the master tree stays exactly the winner's state.
    let mut bob = session(&master.url, "bob");
    bob.load_from_remote().await.unwrap();
    let mut carol = session(&master.url, "carol");
    carol.load_from_remote().await.unwrap();

    bob.set_option("Resources/SE2/Status", "Probing").unwrap();
    let v2 = bob.commit().await.unwrap();

    carol.set_option("Resources/SE3/Status", "Degraded").unwrap();
    let err = carol.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionMismatch);
    assert_eq!(master.service.get_version(), v2);
    assert!(master
        .service
        .store()
        .tree_copy()
        .option_value("Resources/SE3/Status")
        .is_none());

    // (4) The loser rebases onto the latest remote and pushes again.
    let adopted = carol.merge_with_server().await.unwrap();
    assert_eq!(adopted, v2);
    let v3 = carol.commit().await.unwrap();
    assert!(v3 > v2);

    let tree = master.service.store().tree_copy();
    assert_eq!(tree.option_value("Resources/SE1/Status"), Some("Active"));
    assert_eq!(tree.option_value("Resources/SE2/Status"), Some("Probing"));
    assert_eq!(tree.option_value("Resources/SE3/Status"), Some("Degraded"));

    // Commit history lists every accepted push, newest first.
    let history = master.service.commit_history(0).unwrap();
    assert_eq!(history[0].version, v3);
    assert!(history.iter().any(|e| e.committer.starts_with("alice@prod")));
}

#[tokio::test]
async fn test_whoami_round_trip() {
    let dir = TempDir::new().unwrap();
    let master = start_master(dir.path()).await;

    let mut session = session(&master.url, "alice");
    session.load_identity().await.unwrap();
    assert_eq!(session.committer(), "alice@prod - /DC=org/CN=alice");
}

#[tokio::test]
async fn test_slave_refresh_and_heartbeat_over_tcp() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();
    let master = start_master(master_dir.path()).await;

    let slave_url = "tcp://127.0.0.1:59135".to_string();
    let settings = NodeSettings {
        name: "TestCfg".to_string(),
        workdir: slave_dir.path().to_path_buf(),
        self_url: slave_url.clone(),
        master_url: master.url.clone(),
        ..NodeSettings::default()
    };
    let store = Arc::new(ConfigStore::new(&settings).unwrap());
    assert!(!store.is_master());

    let connector = Arc::new(TcpConnector::new(Credentials::new(
        "slave",
        "hosts",
        slave_url.clone(),
    )));
    let refresher = Refresher::new(
        Arc::clone(&store),
        connector,
        RefreshConfig {
            master_url: master.url.clone(),
            gateway_url: None,
            self_url: slave_url.clone(),
            default_refresh_secs: 300,
            auto_publish: true,
        },
    );
    let mut events = refresher.subscribe();

    // First refresh adopts the master's state and heartbeats back.
    let adopted = refresher.refresh_and_publish().await.unwrap();
    assert_eq!(adopted, Some(master.service.get_version()));
    assert!(master.service.store().servers().contains(&slave_url));
    assert_eq!(
        events.recv().await.unwrap().version,
        master.service.get_version()
    );

    // Nothing new: the next refresh is a no-op.
    assert_eq!(refresher.refresh_and_publish().await.unwrap(), None);

    // A push on the master is picked up by the next refresh cycle.
    let mut alice = session(&master.url, "alice");
    alice.load_from_remote().await.unwrap();
    alice.set_option("LogLevel", "DEBUG").unwrap();
    let v_new = alice.commit().await.unwrap();

    let adopted = refresher.refresh_and_publish().await.unwrap();
    assert_eq!(adopted, Some(v_new.clone()));
    assert_eq!(store.current_version(), v_new);
    assert_eq!(store.tree_copy().option_value("LogLevel"), Some("DEBUG"));

    // The adopted copy survives on disk for the next boot.
    let cached = slave_dir.path().join("etc/TestCfg.cfg");
    assert!(cached.exists());
}

#[tokio::test]
async fn test_rollback_and_backup_immutability_over_tcp() {
    let dir = TempDir::new().unwrap();
    let master = start_master(dir.path()).await;

    let mut alice = session(&master.url, "alice");
    alice.load_from_remote().await.unwrap();
    alice.set_option("Phase", "one").unwrap();
    let v1 = alice.commit().await.unwrap();

    alice.merge_with_server().await.unwrap();
    alice.set_option("Phase", "two").unwrap();
    let v2 = alice.commit().await.unwrap();

    // Rollback to v1 restores its content under a fresh version.
    let v3 = alice.rollback_to_version(&v1).await.unwrap();
    assert!(v3 > v2);
    assert_eq!(
        master.service.store().tree_copy().option_value("Phase"),
        Some("one")
    );

    // Stored versions stay byte-identical no matter how often read.
    let first = alice.version_diff(&v1, &v1).await.unwrap();
    assert!(first.lines().all(|line| line.starts_with("  ")));
}
