//! Outbox queue rows and their status transitions. Writes take the
//! connection of an open store transaction; reads go to the pool.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::job::{JobStatus, JobType, Operation, OutboxJob};
use crate::id::new_uuid_v7;
use crate::model::EntityKind;
use crate::time::now_iso;
use crate::{AppError, AppResult};

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxSummary {
    pub pending: i64,
    pub syncing: i64,
    pub failed: i64,
    pub synced: i64,
    pub dead: i64,
}

impl OutboxSummary {
    /// Jobs that still have to reach the remote store.
    pub fn unsynced(&self) -> i64 {
        self.pending + self.syncing + self.failed + self.dead
    }
}

const SELECT_COLUMNS: &str = "id, job_type, entity_type, entity_id, operation, payload, \
     created_at, updated_at, status, try_count, last_error, next_attempt_at";

fn from_row(row: &SqliteRow) -> AppResult<OutboxJob> {
    let job_type: String = row.try_get("job_type")?;
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;
    let payload: String = row.try_get("payload")?;
    let try_count: i64 = row.try_get("try_count")?;
    let unknown = |column: &str, value: &str| {
        AppError::new("OUTBOX/UNKNOWN_VALUE", "Unrecognised outbox column value")
            .with_contexts([("column", column), ("value", value)])
    };
    Ok(OutboxJob {
        id: row.try_get("id")?,
        job_type: JobType::parse(&job_type).ok_or_else(|| unknown("job_type", &job_type))?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        operation: Operation::parse(&operation).ok_or_else(|| unknown("operation", &operation))?,
        payload: serde_json::from_str(&payload)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        status: JobStatus::parse(&status).ok_or_else(|| unknown("status", &status))?,
        try_count: u32::try_from(try_count).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
    })
}

/// Append a pending job. Returns the new job id.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
    operation: Operation,
    payload: &serde_json::Value,
) -> AppResult<String> {
    let id = new_uuid_v7();
    let now = now_iso();
    sqlx::query(
        "INSERT INTO sync_outbox \
         (id, job_type, entity_type, entity_id, operation, payload, created_at, updated_at, status, try_count) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0)",
    )
    .bind(&id)
    .bind(kind.job_type().as_str())
    .bind(kind.as_str())
    .bind(entity_id)
    .bind(operation.as_str())
    .bind(serde_json::to_string(payload)?)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

/// Oldest job that may be attempted at `now`, skipping ids in `skip`.
///
/// Jobs for one entity go out in commit order: a job waits while an older
/// unsynced job for the same record exists, including a `dead` one.
pub async fn next_eligible(
    pool: &SqlitePool,
    now: &str,
    skip: &HashSet<String>,
) -> AppResult<Option<OutboxJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM sync_outbox j \
         WHERE j.status IN ('pending', 'failed') \
           AND (j.next_attempt_at IS NULL OR j.next_attempt_at <= ?) \
           AND NOT EXISTS ( \
             SELECT 1 FROM sync_outbox o \
             WHERE o.entity_type = j.entity_type \
               AND o.entity_id = j.entity_id \
               AND o.status IN ('pending', 'failed', 'syncing', 'dead') \
               AND (o.created_at < j.created_at \
                    OR (o.created_at = j.created_at AND o.rowid < j.rowid))) \
         ORDER BY j.created_at, j.rowid \
         LIMIT ?"
    ))
    .bind(now)
    .bind(skip.len() as i64 + 1)
    .fetch_all(pool)
    .await?;
    for row in &rows {
        let id: String = row.try_get("id")?;
        if !skip.contains(&id) {
            return from_row(row).map(Some);
        }
    }
    Ok(None)
}

/// `pending|failed -> syncing`. False when the job was not in a claimable
/// state.
pub async fn mark_syncing(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
    let changed = sqlx::query(
        "UPDATE sync_outbox SET status = 'syncing', updated_at = ? \
         WHERE id = ? AND status IN ('pending', 'failed')",
    )
    .bind(now_iso())
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(changed == 1)
}

pub async fn mark_synced(conn: &mut SqliteConnection, id: &str) -> AppResult<bool> {
    let changed = sqlx::query(
        "UPDATE sync_outbox SET status = 'synced', updated_at = ?, last_error = NULL, \
         next_attempt_at = NULL WHERE id = ? AND status <> 'synced'",
    )
    .bind(now_iso())
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(changed == 1)
}

/// Record a failed attempt. The job becomes `dead` when `dead` is set,
/// otherwise `failed` and eligible again at `next_attempt_at`.
pub async fn mark_failed(
    conn: &mut SqliteConnection,
    id: &str,
    error: &str,
    try_count: u32,
    next_attempt_at: Option<&str>,
    dead: bool,
) -> AppResult<()> {
    let status = if dead { JobStatus::Dead } else { JobStatus::Failed };
    sqlx::query(
        "UPDATE sync_outbox SET status = ?, try_count = ?, last_error = ?, \
         next_attempt_at = ?, updated_at = ? WHERE id = ? AND status <> 'synced'",
    )
    .bind(status.as_str())
    .bind(i64::from(try_count))
    .bind(error)
    .bind(next_attempt_at)
    .bind(now_iso())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// `syncing -> pending` for jobs a crash left claimed.
pub async fn recover_interrupted(conn: &mut SqliteConnection) -> AppResult<u64> {
    Ok(sqlx::query(
        "UPDATE sync_outbox SET status = 'pending', updated_at = ? WHERE status = 'syncing'",
    )
    .bind(now_iso())
    .execute(&mut *conn)
    .await?
    .rows_affected())
}

/// `dead -> pending` with the attempt counter reset.
pub async fn requeue_dead(conn: &mut SqliteConnection) -> AppResult<u64> {
    Ok(sqlx::query(
        "UPDATE sync_outbox SET status = 'pending', try_count = 0, next_attempt_at = NULL, \
         updated_at = ? WHERE status = 'dead'",
    )
    .bind(now_iso())
    .execute(&mut *conn)
    .await?
    .rows_affected())
}

pub async fn counts(pool: &SqlitePool) -> AppResult<OutboxSummary> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sync_outbox GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut summary = OutboxSummary::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        match JobStatus::parse(&status) {
            Some(JobStatus::Pending) => summary.pending = n,
            Some(JobStatus::Syncing) => summary.syncing = n,
            Some(JobStatus::Failed) => summary.failed = n,
            Some(JobStatus::Synced) => summary.synced = n,
            Some(JobStatus::Dead) => summary.dead = n,
            None => {
                tracing::warn!(target: "barangay_desk", event = "outbox_unknown_status", status = %status, count = n);
            }
        }
    }
    Ok(summary)
}

/// Jobs in queue order, optionally filtered by status.
pub async fn list(
    pool: &SqlitePool,
    status: Option<JobStatus>,
    limit: usize,
) -> AppResult<Vec<OutboxJob>> {
    let limit = limit.max(1) as i64;
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM sync_outbox WHERE status = ? \
                 ORDER BY created_at, rowid LIMIT ?"
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM sync_outbox ORDER BY created_at, rowid LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    rows.iter().map(from_row).collect()
}

pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<Option<OutboxJob>> {
    let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM sync_outbox WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// `base * 2^(attempt - 1)`, capped. `attempt` is the failure count so far.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}
