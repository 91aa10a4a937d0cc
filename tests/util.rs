#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;
use std::time::Duration;

use barangay_desk_lib::model::{BlotterCaseInput, BusinessInput, ResidentInput};
use barangay_desk_lib::sync::InMemoryRemote;
use barangay_desk_lib::{
    DraftAutosave, EngineConfig, NetworkMonitor, Store, SyncWorker, WritePipeline,
};
use tempfile::TempDir;

/// Short timings so tests never wait on production defaults.
pub fn fast_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        db_path: dir.path().join("desk.sqlite3"),
        log_dir: None,
        draft_debounce: Duration::from_millis(40),
        sync_interval: Duration::from_secs(3600),
        health_check_interval: Duration::from_millis(20),
        backoff_base: Duration::ZERO,
        backoff_cap: Duration::ZERO,
        max_attempts: Some(3),
        audit_ship_batch: 50,
        search_limit: 50,
    }
}

/// One engine wired against an in-memory remote.
pub struct Desk {
    pub dir: TempDir,
    pub config: EngineConfig,
    pub store: Store,
    pub drafts: DraftAutosave,
    pub pipeline: WritePipeline,
    pub remote: Arc<InMemoryRemote>,
    pub network: NetworkMonitor,
    pub worker: SyncWorker,
}

pub async fn desk(online: bool) -> Desk {
    let dir = TempDir::new().expect("tempdir");
    let config = fast_config(&dir);
    desk_with(dir, config, online).await
}

pub async fn desk_with(dir: TempDir, config: EngineConfig, online: bool) -> Desk {
    let store = Store::open(&config).await.expect("open store");
    let drafts = DraftAutosave::new(store.clone(), &config);
    let pipeline = WritePipeline::new(store.clone(), drafts.clone());
    let remote = Arc::new(InMemoryRemote::new());
    let network = NetworkMonitor::new(online);
    let worker = SyncWorker::new(
        store.clone(),
        remote.clone(),
        network.clone(),
        config.clone(),
    );
    Desk {
        dir,
        config,
        store,
        drafts,
        pipeline,
        remote,
        network,
        worker,
    }
}

pub fn resident(last: &str, first: &str, birthdate: &str) -> ResidentInput {
    ResidentInput {
        last_name: Some(last.into()),
        first_name: Some(first.into()),
        birthdate: Some(birthdate.into()),
        ..ResidentInput::default()
    }
}

pub fn blotter(complainant: &str, incident_type: &str) -> BlotterCaseInput {
    BlotterCaseInput {
        complainant: Some(complainant.into()),
        incident_type: Some(incident_type.into()),
        incident_date: Some("2024-03-15".into()),
        ..BlotterCaseInput::default()
    }
}

pub fn business(name: &str, owner: &str) -> BusinessInput {
    BusinessInput {
        name: Some(name.into()),
        owner_name: Some(owner.into()),
        ..BusinessInput::default()
    }
}

/// Wait up to two seconds for a document to reach the remote.
pub async fn wait_for_remote(remote: &InMemoryRemote, collection: &str, id: &str) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if remote.document(collection, id).is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
