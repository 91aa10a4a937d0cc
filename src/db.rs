use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Sqlite};

use crate::migrate::SchemaError;
use crate::AppError;

/// SQLite result codes for a file that is not a usable database.
const SQLITE_CORRUPT: &str = "11";
const SQLITE_NOTADB: &str = "26";

pub async fn open_sqlite_pool(db_path: &Path) -> Result<Pool<Sqlite>, AppError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(
                    target: "barangay_desk",
                    event = "data_dir_create_failed",
                    error = %e,
                    path = %parent.display()
                );
                AppError::from(e).with_context("path", parent.display().to_string())
            })?;
        }
    }
    tracing::info!(target: "barangay_desk", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000))
        .log_statements(log::LevelFilter::Debug)
        .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(1));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA wal_autocheckpoint = 1000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .map_err(|e| classify_open_error(e, db_path))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

/// Map "this file is not a database" into the schema error family so the
/// host can offer a reset.
pub(crate) fn classify_open_error(error: sqlx::Error, db_path: &Path) -> AppError {
    let not_a_db = matches!(
        &error,
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some(SQLITE_NOTADB) | Some(SQLITE_CORRUPT))
    );
    if not_a_db {
        tracing::error!(
            target: "barangay_desk",
            event = "db_not_a_database",
            path = %db_path.display(),
            error = %error
        );
        return SchemaError::NotADatabase {
            path: db_path.display().to_string(),
            message: error.to_string(),
        }
        .into();
    }
    AppError::from(error).with_context("path", db_path.display().to_string())
}

/// Log what SQLite actually agreed to; a pragma can be silently refused.
async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    async fn int_pragma(pool: &Pool<Sqlite>, name: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("PRAGMA {name}"))
            .fetch_one(pool)
            .await
            .unwrap_or(i64::MIN)
    }

    let version: String = sqlx::query_scalar("SELECT sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or_else(|_| "unknown".into());
    let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(pool)
        .await
        .unwrap_or_else(|_| "unknown".into());
    let synchronous = int_pragma(pool, "synchronous").await;
    let foreign_keys = int_pragma(pool, "foreign_keys").await;
    let busy_timeout_ms = int_pragma(pool, "busy_timeout").await;

    tracing::info!(
        target: "barangay_desk",
        event = "db_open",
        sqlite_version = %version,
        journal_mode = %journal_mode,
        synchronous,
        foreign_keys,
        busy_timeout_ms
    );
    if !journal_mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(
            target: "barangay_desk",
            event = "db_open_warning",
            journal_mode = %journal_mode,
            "store is not in WAL mode; commits are less crash safe"
        );
    }
}

/// The database file plus the WAL sidecars SQLite keeps next to it.
pub fn database_files(db_path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    };
    [db_path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}

/// Delete the database and its sidecars. Missing files are fine.
pub fn remove_database_files(db_path: &Path) -> Result<(), AppError> {
    for file in database_files(db_path) {
        match std::fs::remove_file(&file) {
            Ok(()) => {
                tracing::info!(target: "barangay_desk", event = "db_file_removed", path = %file.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::from(e).with_context("path", file.display().to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_names_follow_sqlite_convention() {
        let [db, wal, shm] = database_files(Path::new("/data/desk.sqlite3"));
        assert_eq!(db, PathBuf::from("/data/desk.sqlite3"));
        assert_eq!(wal, PathBuf::from("/data/desk.sqlite3-wal"));
        assert_eq!(shm, PathBuf::from("/data/desk.sqlite3-shm"));
    }

    #[test]
    fn removing_missing_files_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        remove_database_files(&dir.path().join("absent.sqlite3")).expect("remove");
    }
}
