//! Local record store: typed tables over one SQLite file, serialized write
//! transactions and change notifications for live queries.

pub mod activity;
pub mod entities;
pub mod meta;
mod search;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::db::{classify_open_error, open_sqlite_pool, remove_database_files};
use crate::migrate::{self, SchemaError};
use crate::model::{DuplicateKey, Entity};
use crate::sync::job::{JobStatus, OutboxJob};
use crate::sync::outbox::{self, OutboxSummary};
use crate::{AppError, AppResult};

pub use activity::{ActivityEntry, ActivityStatus, ActivityType};
pub use meta::SyncMeta;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Residents,
    BlotterCases,
    Businesses,
    PermitIssuances,
    CertificateIssuances,
    PrintLogs,
    Settings,
    SearchTokens,
    ActivityLog,
    AuditQueue,
    Meta,
    SyncOutbox,
    Drafts,
}

impl Table {
    pub const ALL: [Table; 13] = [
        Table::Residents,
        Table::BlotterCases,
        Table::Businesses,
        Table::PermitIssuances,
        Table::CertificateIssuances,
        Table::PrintLogs,
        Table::Settings,
        Table::SearchTokens,
        Table::ActivityLog,
        Table::AuditQueue,
        Table::Meta,
        Table::SyncOutbox,
        Table::Drafts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Residents => "residents",
            Table::BlotterCases => "blotter_cases",
            Table::Businesses => "businesses",
            Table::PermitIssuances => "permit_issuances",
            Table::CertificateIssuances => "certificate_issuances",
            Table::PrintLogs => "print_logs",
            Table::Settings => "settings",
            Table::SearchTokens => "search_tokens",
            Table::ActivityLog => "activity_log",
            Table::AuditQueue => "audit_queue",
            Table::Meta => "meta",
            Table::SyncOutbox => "sync_outbox",
            Table::Drafts => "drafts",
        }
    }
}

/// Published once per touched table after a write transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableChange {
    pub table: Table,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub db_path: String,
    pub schema_version: Option<String>,
    pub user_version: i64,
    pub pending_migrations: Vec<String>,
    pub row_counts: BTreeMap<String, i64>,
    pub outbox: OutboxSummary,
    pub queued_audit_entries: i64,
    pub sync: SyncMeta,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    pool: RwLock<SqlitePool>,
    db_path: PathBuf,
    writer: Arc<Mutex<()>>,
    changes: broadcast::Sender<TableChange>,
    search_limit: usize,
}

impl Store {
    /// Open (creating when missing) and migrate the store at `config.db_path`.
    pub async fn open(config: &EngineConfig) -> AppResult<Store> {
        let pool = open_migrated(&config.db_path).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Store {
            inner: Arc::new(StoreInner {
                pool: RwLock::new(pool),
                db_path: config.db_path.clone(),
                writer: Arc::new(Mutex::new(())),
                changes,
                search_limit: config.search_limit.max(1) as usize,
            }),
        })
    }

    /// Delete whatever is at `config.db_path` and open a fresh store. Used
    /// when [`Store::open`] fails with a `SCHEMA/*` error.
    pub async fn recreate(config: &EngineConfig) -> AppResult<Store> {
        warn!(target: "barangay_desk", event = "db_recreate", path = %config.db_path.display());
        remove_database_files(&config.db_path)?;
        Store::open(config).await
    }

    /// Close the pool, delete the database files and start over in place.
    /// Waits for in-flight write transactions to finish.
    pub async fn reset_and_recreate(&self) -> AppResult<()> {
        let _writer = self.inner.writer.clone().lock_owned().await;
        warn!(target: "barangay_desk", event = "db_reset", path = %self.inner.db_path.display());
        self.pool().close().await;
        remove_database_files(&self.inner.db_path)?;
        let pool = open_migrated(&self.inner.db_path).await?;
        self.replace_pool(pool);
        for table in Table::ALL {
            let _ = self.inner.changes.send(TableChange { table });
        }
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn pool(&self) -> SqlitePool {
        self.inner
            .pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace_pool(&self, new_pool: SqlitePool) {
        let mut guard = self.inner.pool.write().unwrap_or_else(|e| e.into_inner());
        *guard = new_pool;
    }

    pub async fn close(&self) {
        self.pool().close().await;
        info!(target: "barangay_desk", event = "db_closed", path = %self.inner.db_path.display());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.inner.changes.subscribe()
    }

    /// Start a write transaction over `tables`. Write transactions run one at
    /// a time; the lock is held until the returned [`StoreTx`] commits, rolls
    /// back or is dropped.
    pub async fn begin(&self, tables: &[Table]) -> AppResult<StoreTx> {
        let writer = self.inner.writer.clone().lock_owned().await;
        let tx = self.pool().begin().await?;
        debug!(target: "barangay_desk", event = "db_tx_begin", tables = ?tables);
        Ok(StoreTx {
            tx,
            tables: tables.to_vec(),
            changes: self.inner.changes.clone(),
            _writer: writer,
        })
    }

    pub async fn get<E: Entity>(&self, id: &str) -> AppResult<Option<E>> {
        let table = E::KIND.table().name();
        let raw: Option<String> =
            sqlx::query_scalar(&format!("SELECT doc FROM {table} WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool())
                .await?;
        raw.map(|doc| entities::decode::<E>(&doc)).transpose()
    }

    /// Most recently updated records first.
    pub async fn list<E: Entity>(&self, limit: usize) -> AppResult<Vec<E>> {
        search::recent::<E>(&self.pool(), limit).await
    }

    /// Exact match on one of the kind's typed index columns.
    pub async fn list_by_index<E: Entity>(&self, column: &str, value: &str) -> AppResult<Vec<E>> {
        let columns = E::KIND.index_columns();
        let Some(column) = columns.iter().find(|c| **c == column) else {
            return Err(AppError::invalid_field("column", "Not an indexed column.")
                .with_contexts([("column", column), ("entity", E::KIND.as_str())]));
        };
        let table = E::KIND.table().name();
        let rows = sqlx::query(&format!(
            "SELECT doc FROM {table} WHERE {column} = ? ORDER BY updated_at DESC"
        ))
        .bind(value)
        .fetch_all(&self.pool())
        .await?;
        rows.iter()
            .map(|row| entities::decode::<E>(&row.try_get::<String, _>("doc")?))
            .collect()
    }

    /// Token-prefix lookup on the first query word, then substring filtering
    /// on the full query. An empty query lists the latest records. A `limit`
    /// of 0 uses the configured search limit.
    pub async fn search<E: Entity>(&self, text: &str, limit: usize) -> AppResult<Vec<E>> {
        let limit = if limit == 0 { self.inner.search_limit } else { limit };
        search::search::<E>(&self.pool(), text, limit).await
    }

    pub async fn find_by_dup_key<E: Entity>(&self, key: &DuplicateKey) -> AppResult<Option<E>> {
        let table = E::KIND.table().name();
        let raw: Option<String> = sqlx::query_scalar(&format!(
            "SELECT doc FROM {table} WHERE dup_key = ? ORDER BY created_at, rowid LIMIT 1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool())
        .await?;
        raw.map(|doc| entities::decode::<E>(&doc)).transpose()
    }

    pub async fn search_tokens_of(&self, entity_type: &str, id: &str) -> AppResult<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT token FROM search_tokens WHERE entity_type = ? AND entity_id = ? ORDER BY token",
        )
        .bind(entity_type)
        .bind(id)
        .fetch_all(&self.pool())
        .await?)
    }

    pub async fn sync_meta(&self) -> AppResult<SyncMeta> {
        meta::sync_meta(&self.pool()).await
    }

    pub async fn meta_value(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.pool().acquire().await?;
        meta::get(&mut conn, key).await
    }

    pub async fn recent_activity(&self, limit: usize) -> AppResult<Vec<ActivityEntry>> {
        activity::recent(&self.pool(), limit).await
    }

    pub async fn activity_for(&self, entity_id: &str) -> AppResult<Vec<ActivityEntry>> {
        activity::for_entity(&self.pool(), entity_id).await
    }

    pub async fn outbox_summary(&self) -> AppResult<OutboxSummary> {
        outbox::counts(&self.pool()).await
    }

    pub async fn outbox_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> AppResult<Vec<OutboxJob>> {
        outbox::list(&self.pool(), status, limit).await
    }

    pub async fn outbox_job(&self, id: &str) -> AppResult<Option<OutboxJob>> {
        outbox::get(&self.pool(), id).await
    }

    pub async fn count(&self, table: Table) -> AppResult<i64> {
        Ok(
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
                .fetch_one(&self.pool())
                .await?,
        )
    }

    pub async fn status(&self) -> AppResult<StoreStatus> {
        let pool = self.pool();
        let mut row_counts = BTreeMap::new();
        for table in Table::ALL {
            row_counts.insert(table.name().to_string(), self.count(table).await?);
        }
        Ok(StoreStatus {
            db_path: self.inner.db_path.display().to_string(),
            schema_version: migrate::current_version(&pool).await?,
            user_version: migrate::user_version(&pool).await?,
            pending_migrations: migrate::pending_versions(&pool)
                .await?
                .into_iter()
                .map(str::to_string)
                .collect(),
            queued_audit_entries: row_counts
                .get(Table::AuditQueue.name())
                .copied()
                .unwrap_or(0),
            row_counts,
            outbox: outbox::counts(&pool).await?,
            sync: meta::sync_meta(&pool).await?,
        })
    }
}

async fn open_migrated(db_path: &Path) -> AppResult<SqlitePool> {
    let pool = open_sqlite_pool(db_path).await?;
    if let Err(err) = migrate::apply_migrations(&pool).await {
        pool.close().await;
        let err = match err {
            SchemaError::Sqlx(e) => classify_open_error(e, db_path),
            other => AppError::from(other),
        };
        error!(target: "barangay_desk", event = "db_migrate_failed", path = %db_path.display(), error = %err);
        return Err(err);
    }
    Ok(pool)
}

/// A write transaction holding the store's writer lock.
///
/// Dropping without [`StoreTx::commit`] rolls back.
pub struct StoreTx {
    tx: Transaction<'static, Sqlite>,
    tables: Vec<Table>,
    changes: broadcast::Sender<TableChange>,
    _writer: OwnedMutexGuard<()>,
}

impl StoreTx {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Declare another table touched by this transaction.
    pub fn touch(&mut self, table: Table) {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
    }

    pub async fn commit(self) -> AppResult<()> {
        self.tx.commit().await?;
        debug!(target: "barangay_desk", event = "db_tx_commit", tables = ?self.tables);
        for table in &self.tables {
            // No subscribers is fine.
            let _ = self.changes.send(TableChange { table: *table });
        }
        Ok(())
    }

    pub async fn rollback(self) {
        if let Err(rb) = self.tx.rollback().await {
            error!(target: "barangay_desk", event = "db_tx_rollback_failed", error = %rb);
        } else {
            warn!(target: "barangay_desk", event = "db_tx_rollback", tables = ?self.tables);
        }
    }
}
