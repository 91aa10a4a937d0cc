use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::time::now_iso;
use crate::AppResult;

pub const LAST_SYNC_AT: &str = "lastSyncAtISO";
pub const LAST_SYNC_ERROR: &str = "lastSyncError";

/// Outcome of the latest drain cycle as persisted in `meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    #[serde(rename = "lastSyncAtISO")]
    pub last_sync_at: Option<String>,
    pub last_sync_error: Option<String>,
}

pub async fn get(conn: &mut SqliteConnection, key: &str) -> AppResult<Option<String>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value.flatten())
}

pub async fn set(conn: &mut SqliteConnection, key: &str, value: &str) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO meta (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(now_iso())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn remove(conn: &mut SqliteConnection, key: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM meta WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Increment and return a named counter. Starts at 1.
pub async fn next_sequence(conn: &mut SqliteConnection, key: &str) -> AppResult<u64> {
    let current = get(conn, key)
        .await?
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let next = current + 1;
    set(conn, key, &next.to_string()).await?;
    Ok(next)
}

pub async fn sync_meta(pool: &SqlitePool) -> AppResult<SyncMeta> {
    let mut conn = pool.acquire().await?;
    Ok(SyncMeta {
        last_sync_at: get(&mut conn, LAST_SYNC_AT).await?,
        last_sync_error: get(&mut conn, LAST_SYNC_ERROR).await?,
    })
}
