//! Append-only activity log and the queue of entries still to be shipped to
//! the remote `audit_logs` collection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::id::new_uuid_v7;
use crate::time::now_iso;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Print,
    SyncFailed,
    SyncDead,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Create => "create",
            ActivityType::Update => "update",
            ActivityType::Delete => "delete",
            ActivityType::Print => "print",
            ActivityType::SyncFailed => "sync_failed",
            ActivityType::SyncDead => "sync_dead",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        [
            ActivityType::Create,
            ActivityType::Update,
            ActivityType::Delete,
            ActivityType::Print,
            ActivityType::SyncFailed,
            ActivityType::SyncDead,
        ]
        .into_iter()
        .find(|t| t.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Ok,
    Warn,
    Error,
}

impl ActivityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityStatus::Ok => "ok",
            ActivityStatus::Warn => "warn",
            ActivityStatus::Error => "error",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ok" => Some(ActivityStatus::Ok),
            "warn" => Some(ActivityStatus::Warn),
            "error" => Some(ActivityStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub occurred_at: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub entity_type: String,
    pub entity_id: String,
    pub status: ActivityStatus,
    pub title: String,
    pub subtitle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ActivityEntry {
    pub fn new(
        kind: ActivityType,
        entity_type: &str,
        entity_id: &str,
        status: ActivityStatus,
        title: impl Into<String>,
        subtitle: impl Into<String>,
    ) -> Self {
        ActivityEntry {
            id: new_uuid_v7(),
            occurred_at: now_iso(),
            kind,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            status,
            title: title.into(),
            subtitle: subtitle.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn from_row(row: &SqliteRow) -> AppResult<ActivityEntry> {
    let kind: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let details: Option<String> = row.try_get("details")?;
    Ok(ActivityEntry {
        id: row.try_get("id")?,
        occurred_at: row.try_get("occurred_at")?,
        kind: ActivityType::parse(&kind).ok_or_else(|| {
            AppError::new("ACTIVITY/UNKNOWN_TYPE", "Unknown activity type").with_context("type", kind.clone())
        })?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        status: ActivityStatus::parse(&status).ok_or_else(|| {
            AppError::new("ACTIVITY/UNKNOWN_STATUS", "Unknown activity status")
                .with_context("status", status.clone())
        })?,
        title: row.try_get("title")?,
        subtitle: row.try_get("subtitle")?,
        details: details.map(|d| serde_json::from_str(&d)).transpose()?,
    })
}

const SELECT_COLUMNS: &str =
    "a.id, a.occurred_at, a.type, a.entity_type, a.entity_id, a.status, a.title, a.subtitle, a.details";

/// Append an entry and queue it for shipping, in the caller's transaction.
pub async fn append(conn: &mut SqliteConnection, entry: &ActivityEntry) -> AppResult<()> {
    let details = entry
        .details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        "INSERT INTO activity_log \
         (id, occurred_at, type, entity_type, entity_id, status, title, subtitle, details) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.occurred_at)
    .bind(entry.kind.as_str())
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(entry.status.as_str())
    .bind(&entry.title)
    .bind(&entry.subtitle)
    .bind(details)
    .execute(&mut *conn)
    .await?;
    sqlx::query("INSERT INTO audit_queue (entry_id, enqueued_at) VALUES (?, ?)")
        .bind(&entry.id)
        .bind(&entry.occurred_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn recent(pool: &SqlitePool, limit: usize) -> AppResult<Vec<ActivityEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM activity_log a ORDER BY a.occurred_at DESC, a.rowid DESC LIMIT ?"
    ))
    .bind(limit.max(1) as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn for_entity(pool: &SqlitePool, entity_id: &str) -> AppResult<Vec<ActivityEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM activity_log a WHERE a.entity_id = ? \
         ORDER BY a.occurred_at, a.rowid"
    ))
    .bind(entity_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Fewest failed uploads first, then oldest. An entry the remote keeps
/// rejecting sinks behind newer ones instead of filling every batch.
pub async fn queued(pool: &SqlitePool, limit: usize) -> AppResult<Vec<ActivityEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM audit_queue q JOIN activity_log a ON a.id = q.entry_id \
         ORDER BY q.try_count, q.enqueued_at, q.rowid LIMIT ?"
    ))
    .bind(limit.max(1) as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn mark_shipped(conn: &mut SqliteConnection, entry_id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM audit_queue WHERE entry_id = ?")
        .bind(entry_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn mark_ship_failed(
    conn: &mut SqliteConnection,
    entry_id: &str,
    error: &str,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE audit_queue SET try_count = try_count + 1, last_error = ? WHERE entry_id = ?",
    )
    .bind(error)
    .bind(entry_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_type_field() {
        let entry = ActivityEntry::new(
            ActivityType::SyncFailed,
            "resident",
            "r1",
            ActivityStatus::Error,
            "Sync failed",
            "Cruz, Juan",
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "sync_failed");
        assert_eq!(value["status"], "error");
        assert_eq!(value["entityId"], "r1");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn wire_names_parse_back() {
        for kind in [ActivityType::Create, ActivityType::Print, ActivityType::SyncDead] {
            assert_eq!(ActivityType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityStatus::parse("warn"), Some(ActivityStatus::Warn));
        assert_eq!(ActivityType::parse("draft_restored"), None);
    }
}
