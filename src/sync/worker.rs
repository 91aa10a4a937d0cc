use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Operation, OutboxJob};
use super::network::NetworkMonitor;
use super::outbox::{self, backoff_delay};
use super::remote::{sanitize_payload, RemoteStore};
use crate::config::EngineConfig;
use crate::model::EntityKind;
use crate::store::{activity, meta, ActivityEntry, ActivityStatus, ActivityType, Store, Table};
use crate::time::{iso_after, now_iso};
use crate::{AppError, AppResult};

/// Remote collection that receives shipped activity entries.
pub const AUDIT_COLLECTION: &str = "audit_logs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub success_count: u32,
    pub failure_count: u32,
    /// Failures that moved a job to `dead`. Included in `failure_count`.
    pub dead_count: u32,
    pub audit_shipped: u32,
    pub audit_failed: u32,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    Offline,
    AlreadyRunning,
}

enum JobResult {
    Synced,
    Failed(String),
    Dead(String),
    Skipped,
}

/// Held for the duration of one drain cycle.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DrainGuard { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Drains the outbox against the remote store, one job at a time.
#[derive(Clone)]
pub struct SyncWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    store: Store,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    config: EngineConfig,
    draining: AtomicBool,
    wake: Notify,
    reports: watch::Sender<Option<DrainReport>>,
}

impl SyncWorker {
    pub fn new(
        store: Store,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
        config: EngineConfig,
    ) -> Self {
        let (reports, _) = watch::channel(None);
        SyncWorker {
            inner: Arc::new(WorkerInner {
                store,
                remote,
                network,
                config,
                draining: AtomicBool::new(false),
                wake: Notify::new(),
                reports,
            }),
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Ask the background loop for a cycle as soon as possible.
    pub fn request_drain(&self) {
        self.inner.wake.notify_one();
    }

    pub fn last_report(&self) -> Option<DrainReport> {
        self.inner.reports.borrow().clone()
    }

    pub fn reports(&self) -> watch::Receiver<Option<DrainReport>> {
        self.inner.reports.subscribe()
    }

    /// Return jobs stuck in `syncing` to `pending`. Remote upserts are
    /// idempotent, so replaying them is safe.
    pub async fn recover_interrupted(&self) -> AppResult<u64> {
        let mut tx = self.inner.store.begin(&[Table::SyncOutbox]).await?;
        let recovered = outbox::recover_interrupted(tx.conn()).await?;
        tx.commit().await?;
        if recovered > 0 {
            warn!(target: "barangay_desk", event = "outbox_recovered", jobs = recovered);
        }
        Ok(recovered)
    }

    /// Move every `dead` job back to `pending` with a fresh attempt budget.
    pub async fn requeue_dead(&self) -> AppResult<u64> {
        let mut tx = self.inner.store.begin(&[Table::SyncOutbox]).await?;
        let requeued = outbox::requeue_dead(tx.conn()).await?;
        tx.commit().await?;
        info!(target: "barangay_desk", event = "outbox_requeued_dead", jobs = requeued);
        if requeued > 0 {
            self.request_drain();
        }
        Ok(requeued)
    }

    /// Run one drain cycle now.
    pub async fn drain_cycle(&self) -> AppResult<DrainOutcome> {
        if !self.inner.network.is_online() {
            debug!(target: "barangay_desk", event = "sync_cycle_skipped", reason = "offline");
            return Ok(DrainOutcome::Offline);
        }
        let Some(_guard) = DrainGuard::try_begin(&self.inner.draining) else {
            debug!(target: "barangay_desk", event = "sync_cycle_skipped", reason = "already_running");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let mut report = DrainReport {
            started_at: now_iso(),
            ..DrainReport::default()
        };
        info!(target: "barangay_desk", event = "sync_cycle_start");

        // Only one cycle runs at a time, so anything still `syncing` was left
        // by a cycle that died.
        self.recover_interrupted().await?;

        let pool = self.inner.store.pool();
        let mut attempted = HashSet::new();
        let mut last_error = None;
        while self.inner.network.is_online() {
            let Some(job) = outbox::next_eligible(&pool, &now_iso(), &attempted).await? else {
                break;
            };
            attempted.insert(job.id.clone());
            match self.process_job(&job).await? {
                JobResult::Synced => report.success_count += 1,
                JobResult::Failed(err) => {
                    report.failure_count += 1;
                    last_error = Some(err);
                }
                JobResult::Dead(err) => {
                    report.failure_count += 1;
                    report.dead_count += 1;
                    last_error = Some(err);
                }
                JobResult::Skipped => {}
            }
        }

        self.ship_audit(&mut report).await?;

        report.finished_at = now_iso();
        let mut tx = self.inner.store.begin(&[Table::Meta]).await?;
        meta::set(tx.conn(), meta::LAST_SYNC_AT, &report.finished_at).await?;
        match &last_error {
            Some(err) => meta::set(tx.conn(), meta::LAST_SYNC_ERROR, err).await?,
            None => meta::remove(tx.conn(), meta::LAST_SYNC_ERROR).await?,
        }
        tx.commit().await?;

        info!(
            target: "barangay_desk",
            event = "sync_cycle_complete",
            synced = report.success_count,
            failed = report.failure_count,
            dead = report.dead_count,
            audit_shipped = report.audit_shipped,
            audit_failed = report.audit_failed
        );
        self.inner.reports.send_replace(Some(report.clone()));
        Ok(DrainOutcome::Completed(report))
    }

    async fn process_job(&self, job: &OutboxJob) -> AppResult<JobResult> {
        let mut tx = self.inner.store.begin(&[Table::SyncOutbox]).await?;
        let claimed = outbox::mark_syncing(tx.conn(), &job.id).await?;
        tx.commit().await?;
        if !claimed {
            return Ok(JobResult::Skipped);
        }

        let collection = job.job_type.collection();
        let result = match job.operation {
            Operation::Upsert => match sanitize_payload(&job.payload) {
                Ok(doc) => self
                    .inner
                    .remote
                    .upsert(collection, &job.entity_id, &doc, true)
                    .await
                    .map_err(AppError::from),
                Err(err) => Err(err),
            },
            Operation::Delete => self
                .inner
                .remote
                .delete(collection, &job.entity_id)
                .await
                .map_err(AppError::from),
        };

        match result {
            Ok(()) => {
                let mut tx = self.inner.store.begin(&[Table::SyncOutbox]).await?;
                outbox::mark_synced(tx.conn(), &job.id).await?;
                tx.commit().await?;
                debug!(
                    target: "barangay_desk",
                    event = "sync_job_synced",
                    job_id = %job.id,
                    job_type = job.job_type.as_str(),
                    entity_id = %job.entity_id
                );
                Ok(JobResult::Synced)
            }
            Err(err) => self.record_failure(job, err).await,
        }
    }

    async fn record_failure(&self, job: &OutboxJob, err: AppError) -> AppResult<JobResult> {
        let config = &self.inner.config;
        let try_count = job.try_count.saturating_add(1);
        let dead = config.max_attempts.is_some_and(|max| try_count >= max);
        let next_attempt_at = (!dead).then(|| {
            iso_after(backoff_delay(
                config.backoff_base,
                config.backoff_cap,
                try_count,
            ))
        });
        let message = err.message().to_string();

        let label = EntityKind::parse(&job.entity_type).map_or("Record", EntityKind::label);
        let (kind, title) = if dead {
            (ActivityType::SyncDead, "Sync stopped after repeated failures")
        } else {
            (ActivityType::SyncFailed, "Sync failed")
        };
        let entry = ActivityEntry::new(
            kind,
            &job.entity_type,
            &job.entity_id,
            ActivityStatus::Error,
            title,
            format!("{label} {}", job.entity_id),
        )
        .with_details(json!({
            "jobId": job.id,
            "jobType": job.job_type.as_str(),
            "tryCount": try_count,
            "error": message,
        }));

        let mut tx = self
            .inner
            .store
            .begin(&[Table::SyncOutbox, Table::ActivityLog, Table::AuditQueue])
            .await?;
        outbox::mark_failed(
            tx.conn(),
            &job.id,
            &message,
            try_count,
            next_attempt_at.as_deref(),
            dead,
        )
        .await?;
        activity::append(tx.conn(), &entry).await?;
        tx.commit().await?;

        let event = if dead { "sync_job_dead" } else { "sync_job_failed" };
        warn!(
            target: "barangay_desk",
            event,
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            entity_id = %job.entity_id,
            try_count,
            next_attempt_at = next_attempt_at.as_deref().unwrap_or(""),
            error = %err
        );
        Ok(if dead {
            JobResult::Dead(message)
        } else {
            JobResult::Failed(message)
        })
    }

    /// Best-effort upload of queued activity entries.
    async fn ship_audit(&self, report: &mut DrainReport) -> AppResult<()> {
        if !self.inner.network.is_online() {
            return Ok(());
        }
        let batch = self.inner.config.audit_ship_batch.max(1) as usize;
        let entries = activity::queued(&self.inner.store.pool(), batch).await?;
        for entry in entries {
            let shipped = match serde_json::to_value(&entry)
                .map_err(AppError::from)
                .and_then(|value| sanitize_payload(&value))
            {
                Ok(doc) => self
                    .inner
                    .remote
                    .upsert(AUDIT_COLLECTION, &entry.id, &doc, true)
                    .await
                    .map_err(AppError::from),
                Err(err) => Err(err),
            };
            let mut tx = self.inner.store.begin(&[Table::AuditQueue]).await?;
            match &shipped {
                Ok(()) => activity::mark_shipped(tx.conn(), &entry.id).await?,
                Err(err) => activity::mark_ship_failed(tx.conn(), &entry.id, err.message()).await?,
            }
            tx.commit().await?;
            match shipped {
                Ok(()) => report.audit_shipped += 1,
                Err(err) => {
                    report.audit_failed += 1;
                    debug!(target: "barangay_desk", event = "audit_ship_failed", entry_id = %entry.id, error = %err);
                }
            }
        }
        Ok(())
    }

    async fn run_logged(&self) {
        if let Err(err) = self.drain_cycle().await {
            error!(target: "barangay_desk", event = "sync_cycle_error", error = %err);
        }
    }

    /// Drive the online flag from the remote's health check every
    /// `health_check_interval`. Runs until `shutdown` flips to true.
    pub fn spawn_health_check(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.inner.network.spawn_health_check(
            self.inner.remote.clone(),
            self.inner.config.health_check_interval,
            shutdown,
        )
    }

    /// Background loop: drains on startup, on every offline to online
    /// transition, on each `sync_interval` tick while online and whenever
    /// [`SyncWorker::request_drain`] is called. Shutdown is observed between
    /// cycles.
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            if let Err(err) = worker.recover_interrupted().await {
                error!(target: "barangay_desk", event = "outbox_recover_failed", error = %err);
            }
            let mut online = worker.inner.network.subscribe();
            let mut ticker = tokio::time::interval(worker.inner.config.sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(target: "barangay_desk", event = "sync_worker_started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let is_online = *online.borrow_and_update();
                        if is_online {
                            worker.run_logged().await;
                        }
                    }
                    _ = ticker.tick() => {
                        if worker.inner.network.is_online() {
                            worker.run_logged().await;
                        }
                    }
                    _ = worker.inner.wake.notified() => {
                        worker.run_logged().await;
                    }
                }
            }
            info!(target: "barangay_desk", event = "sync_worker_stopped");
        })
    }
}
