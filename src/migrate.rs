use std::collections::HashMap;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqliteConnection, SqlitePool};
use tracing::{error, info};

use crate::model::{tokens_for_document, EntityKind};
use crate::time::now_ms;

/// Rust step run once after a migration's SQL, inside the same transaction.
/// Returns the number of rows touched.
pub type Backfill = for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, anyhow::Result<u64>>;

pub struct Migration {
    pub version: &'static str,
    pub sql: &'static str,
    pub backfill: Option<Backfill>,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_initial",
        sql: include_str!("../migrations/0001_initial.sql"),
        backfill: None,
    },
    Migration {
        version: "0002_status_and_backoff",
        sql: include_str!("../migrations/0002_status_and_backoff.sql"),
        backfill: Some(backfill_status),
    },
    Migration {
        version: "0003_search_token_backfill",
        sql: include_str!("../migrations/0003_search_token_backfill.sql"),
        backfill: Some(backfill_search_tokens),
    },
];

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("database contains migration {version}, which this build does not know")]
    UnknownVersion { version: String },
    #[error("migration {version} was edited after it was applied")]
    ChecksumMismatch { version: String },
    #[error("{path} is not a readable database: {message}")]
    NotADatabase { path: String, message: String },
    #[error("no migration named {version}")]
    UnknownTarget { version: String },
    #[error("migration {version} failed: {source}")]
    Statement {
        version: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("backfill for migration {version} failed: {message}")]
    Backfill { version: String, message: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SchemaError {
    pub fn version(&self) -> Option<&str> {
        match self {
            SchemaError::UnknownVersion { version }
            | SchemaError::ChecksumMismatch { version }
            | SchemaError::UnknownTarget { version }
            | SchemaError::Statement { version, .. }
            | SchemaError::Backfill { version, .. } => Some(version),
            SchemaError::NotADatabase { .. } | SchemaError::Sqlx(_) => None,
        }
    }
}

static ADD_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)")
        .expect("add-column pattern compiles")
});

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    match trimmed.char_indices().nth(160) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

/// Numeric prefix of a version name, mirrored into `PRAGMA user_version`.
fn version_number(version: &str) -> i64 {
    version
        .split('_')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

pub async fn apply_migrations(pool: &SqlitePool) -> Result<Vec<String>, SchemaError> {
    apply_migrations_to(pool, None).await
}

/// Apply pending migrations in order, stopping after `target` when given.
/// Returns the versions applied by this call.
pub async fn apply_migrations_to(
    pool: &SqlitePool,
    target: Option<&str>,
) -> Result<Vec<String>, SchemaError> {
    if let Some(target) = target {
        if !MIGRATIONS.iter().any(|m| m.version == target) {
            return Err(SchemaError::UnknownTarget {
                version: target.to_string(),
            });
        }
    }

    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;

    let applied = applied_checksums(pool).await?;
    for version in applied.keys() {
        if !MIGRATIONS.iter().any(|m| m.version == version) {
            error!(target: "barangay_desk", event = "migration_unknown_version", version = %version);
            return Err(SchemaError::UnknownVersion {
                version: version.clone(),
            });
        }
    }

    let mut newly_applied = Vec::new();
    for migration in MIGRATIONS {
        let cleaned = strip_comments(migration.sql);
        let sum = checksum(&cleaned);

        if let Some(stored) = applied.get(migration.version) {
            if stored != &sum {
                error!(target: "barangay_desk", event = "migration_checksum_mismatch", version = %migration.version);
                return Err(SchemaError::ChecksumMismatch {
                    version: migration.version.to_string(),
                });
            }
            info!(target: "barangay_desk", event = "migration_skip_file", version = %migration.version);
        } else {
            apply_one(pool, migration, &cleaned, &sum).await?;
            newly_applied.push(migration.version.to_string());
        }

        if target == Some(migration.version) {
            break;
        }
    }

    Ok(newly_applied)
}

async fn apply_one(
    pool: &SqlitePool,
    migration: &Migration,
    cleaned: &str,
    sum: &str,
) -> Result<(), SchemaError> {
    let version = migration.version;
    let statement_error = |source: sqlx::Error| SchemaError::Statement {
        version: version.to_string(),
        source,
    };

    let mut tx = pool.begin().await?;
    for stmt in cleaned.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        let upper = s.to_ascii_uppercase();
        if upper == "BEGIN" || upper == "COMMIT" {
            continue;
        }
        if let Some(caps) = ADD_COLUMN_RE.captures(s) {
            if let (Some(table), Some(col)) = (caps.get(1), caps.get(2)) {
                let exists: Option<i64> = sqlx::query_scalar(
                    "SELECT 1 FROM pragma_table_info(?) WHERE name = ?",
                )
                .bind(table.as_str())
                .bind(col.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(statement_error)?;
                if exists.is_some() {
                    info!(target: "barangay_desk", event = "migration_stmt_skip", version = %version, sql = %preview(s));
                    continue;
                }
            }
        }
        info!(target: "barangay_desk", event = "migration_stmt", version = %version, sql = %preview(s));
        if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
            error!(target: "barangay_desk", event = "migration_stmt_error", version = %version, sql = %preview(s), error = %e);
            return Err(statement_error(e));
        }
    }

    if let Some(backfill) = migration.backfill {
        match backfill(&mut *tx).await {
            Ok(rows) => {
                info!(target: "barangay_desk", event = "migration_backfill", version = %version, rows);
            }
            Err(e) => {
                error!(target: "barangay_desk", event = "migration_backfill_error", version = %version, error = %e);
                return Err(SchemaError::Backfill {
                    version: version.to_string(),
                    message: format!("{e:#}"),
                });
            }
        }
    }

    sqlx::query("INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)")
        .bind(version)
        .bind(now_ms())
        .bind(sum)
        .execute(&mut *tx)
        .await
        .map_err(statement_error)?;
    sqlx::query(&format!(
        "PRAGMA user_version = {}",
        version_number(version)
    ))
    .execute(&mut *tx)
    .await
    .map_err(statement_error)?;

    tx.commit().await?;
    info!(target: "barangay_desk", event = "migration_file_applied", version = %version);
    Ok(())
}

async fn applied_checksums(pool: &SqlitePool) -> Result<HashMap<String, String>, SchemaError> {
    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied = HashMap::new();
    for r in rows {
        applied.insert(r.try_get::<String, _>("version")?, r.try_get("checksum")?);
    }
    Ok(applied)
}

/// Highest applied migration, if any.
pub async fn current_version(pool: &SqlitePool) -> Result<Option<String>, SchemaError> {
    let has_table: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
    )
    .fetch_optional(pool)
    .await?;
    if has_table.is_none() {
        return Ok(None);
    }
    Ok(
        sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(pool)
            .await?,
    )
}

pub async fn user_version(pool: &SqlitePool) -> Result<i64, SchemaError> {
    Ok(sqlx::query_scalar("PRAGMA user_version").fetch_one(pool).await?)
}

/// Migrations this build knows that the database has not applied yet.
pub async fn pending_versions(pool: &SqlitePool) -> Result<Vec<&'static str>, SchemaError> {
    let applied = match current_version(pool).await? {
        Some(_) => applied_checksums(pool).await?,
        None => HashMap::new(),
    };
    Ok(MIGRATIONS
        .iter()
        .map(|m| m.version)
        .filter(|v| !applied.contains_key(*v))
        .collect())
}

/// Rows written before `status` became a column get the record default, in
/// the column and in the stored document.
fn backfill_status(conn: &mut SqliteConnection) -> BoxFuture<'_, anyhow::Result<u64>> {
    Box::pin(async move {
        let mut touched = 0;
        for (table, default) in [("blotter_cases", "open"), ("businesses", "active")] {
            touched += sqlx::query(&format!(
                "UPDATE {table} SET status = COALESCE(json_extract(doc, '$.status'), ?) \
                 WHERE status IS NULL"
            ))
            .bind(default)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            sqlx::query(&format!(
                "UPDATE {table} SET doc = json_set(doc, '$.status', status) \
                 WHERE json_extract(doc, '$.status') IS NULL"
            ))
            .execute(&mut *conn)
            .await?;
        }
        Ok(touched)
    })
}

/// Rebuild search tokens for records that have none indexed.
fn backfill_search_tokens(conn: &mut SqliteConnection) -> BoxFuture<'_, anyhow::Result<u64>> {
    Box::pin(async move {
        let mut touched = 0;
        for kind in EntityKind::ALL {
            let table = kind.table().name();
            let rows = sqlx::query(&format!(
                "SELECT id, doc FROM {table} e WHERE NOT EXISTS \
                 (SELECT 1 FROM search_tokens t WHERE t.entity_type = ? AND t.entity_id = e.id)"
            ))
            .bind(kind.as_str())
            .fetch_all(&mut *conn)
            .await?;
            for row in rows {
                let id: String = row.try_get("id")?;
                let raw: String = row.try_get("doc")?;
                let mut doc: Value = serde_json::from_str(&raw)?;
                let tokens = tokens_for_document(kind, doc.clone())?;
                if tokens.is_empty() {
                    continue;
                }
                for token in &tokens {
                    sqlx::query(
                        "INSERT OR IGNORE INTO search_tokens (entity_type, entity_id, token) VALUES (?, ?, ?)",
                    )
                    .bind(kind.as_str())
                    .bind(&id)
                    .bind(token)
                    .execute(&mut *conn)
                    .await?;
                }
                if let Value::Object(map) = &mut doc {
                    map.insert("searchTokens".into(), serde_json::to_value(&tokens)?);
                }
                sqlx::query(&format!("UPDATE {table} SET doc = ? WHERE id = ?"))
                    .bind(serde_json::to_string(&doc)?)
                    .bind(&id)
                    .execute(&mut *conn)
                    .await?;
                touched += 1;
            }
        }
        Ok(touched)
    })
}
