#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tempfile::TempDir;
use tracing::subscriber::{self, DefaultGuard};
use tracing_subscriber::{fmt, EnvFilter};

use barangay_desk_lib::model::Resident;
use barangay_desk_lib::{init_logging, CommitOptions, Entity};

#[path = "util.rs"]
mod util;

struct BufferWriter(Arc<StdMutex<Vec<u8>>>);

impl std::io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_buffer_subscriber() -> (Arc<StdMutex<Vec<u8>>>, DefaultGuard) {
    let buffer: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("barangay_desk=debug"))
        .with_writer(move || BufferWriter(writer.clone()))
        .json()
        .finish();
    let guard = subscriber::set_default(subscriber);
    (buffer, guard)
}

fn events(buffer: &Arc<StdMutex<Vec<u8>>>) -> Vec<Value> {
    let raw = String::from_utf8(buffer.lock().unwrap().clone()).expect("log utf8");
    raw.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect()
}

fn find<'a>(events: &'a [Value], name: &str) -> Option<&'a Value> {
    events.iter().find(|e| e["fields"]["event"] == name)
}

#[tokio::test]
async fn commit_and_drain_emit_structured_events() -> Result<()> {
    let (buffer, _guard) = init_buffer_subscriber();
    let desk = util::desk(true).await;
    let record = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();
    desk.worker.drain_cycle().await?;

    let events = events(&buffer);
    let committed = find(&events, "record_committed").expect("record_committed logged");
    assert_eq!(committed["target"], "barangay_desk");
    assert_eq!(committed["fields"]["entity"], "resident");
    assert_eq!(committed["fields"]["id"], record.id());

    let cycle = find(&events, "sync_cycle_complete").expect("sync_cycle_complete logged");
    assert_eq!(cycle["fields"]["synced"], 1);

    // Record contents stay out of the log.
    let raw = String::from_utf8(buffer.lock().unwrap().clone())?;
    assert!(!raw.contains("Juan"));
    Ok(())
}

#[tokio::test]
async fn sync_failures_are_logged_as_warnings() -> Result<()> {
    let (buffer, _guard) = init_buffer_subscriber();
    let desk = util::desk(true).await;
    let record = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();
    desk.remote.fail_document("residents", record.id());
    desk.worker.drain_cycle().await?;

    let events = events(&buffer);
    let failed = find(&events, "sync_job_failed").expect("sync_job_failed logged");
    assert_eq!(failed["level"], "WARN");
    assert_eq!(failed["fields"]["try_count"], 1);
    Ok(())
}

#[tokio::test]
async fn init_logging_writes_a_daily_file_and_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    init_logging(Some(dir.path()));
    init_logging(Some(dir.path()));

    tracing::info!(target: "barangay_desk", event = "log_file_smoke");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut found = false;
    while !found && tokio::time::Instant::now() < deadline {
        for entry in std::fs::read_dir(dir.path())? {
            let path = entry?.path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with("barangay-desk.log") {
                found = std::fs::read_to_string(&path)?.contains("log_file_smoke");
            }
        }
        if !found {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    assert!(found, "log file never received the event");
    Ok(())
}
