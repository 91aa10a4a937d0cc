//! Structured errors shared by the store, the pipeline and the sync worker.
//!
//! Codes are `FAMILY/REASON` strings so the UI can branch on the family
//! (`VALIDATION/*` goes back to the form, `SCHEMA/*` offers a reset) and show
//! `message` as is.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::migrate::SchemaError;
use crate::sync::remote::RemoteError;

pub const VALIDATION_MISSING_FIELD: &str = "VALIDATION/MISSING_FIELD";
/// Bad date, unknown enum value and the like.
pub const VALIDATION_INVALID_FIELD: &str = "VALIDATION/INVALID_FIELD";
/// An edit named a record id that does not exist locally.
pub const VALIDATION_NOT_FOUND: &str = "VALIDATION/NOT_FOUND";
/// Nothing was written and the draft is intact.
pub const LOCAL_WRITE_FAILED: &str = "LOCAL_WRITE/FAILED";
pub const SCHEMA_INCOMPATIBLE: &str = "SCHEMA/INCOMPATIBLE";
pub const SCHEMA_MIGRATION_FAILED: &str = "SCHEMA/MIGRATION_FAILED";
/// Recorded on the outbox job, never returned from a local write.
pub const SYNC_REMOTE: &str = "SYNC/REMOTE";
pub const SYNC_PAYLOAD: &str = "SYNC/PAYLOAD";
/// Fallback for foreign errors that carry no code of their own.
pub const INTERNAL: &str = "INTERNAL/ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn missing_field(field: &str) -> Self {
        AppError::new(VALIDATION_MISSING_FIELD, format!("{field} is required."))
            .with_context("field", field)
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        AppError::new(VALIDATION_INVALID_FIELD, message).with_context("field", field)
    }

    /// A failed local transaction, keeping the database error as the cause.
    pub fn local_write(cause: AppError) -> Self {
        AppError::new(
            LOCAL_WRITE_FAILED,
            "The record could not be saved on this device.",
        )
        .with_cause(cause)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    fn family(&self) -> &str {
        self.code.split('/').next().unwrap_or_default()
    }

    pub fn is_validation(&self) -> bool {
        self.family() == "VALIDATION"
    }

    /// The store must be reset before it can be used again.
    pub fn is_schema(&self) -> bool {
        self.family() == "SCHEMA"
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.context.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut pairs: Vec<_> = self.context.iter().collect();
            pairs.sort();
            let pairs: Vec<String> = pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, " ({})", pairs.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as _)
    }
}

impl From<anyhow::Error> for AppError {
    /// Keeps the first `AppError` found in the chain; everything above it
    /// becomes an `INTERNAL/ERROR` wrapper.
    fn from(error: anyhow::Error) -> Self {
        let mut layers = Vec::new();
        for link in error.chain() {
            if let Some(app) = link.downcast_ref::<AppError>() {
                return wrap_layers(layers, app.clone());
            }
            layers.push(link.to_string());
        }
        let innermost = layers
            .pop()
            .map(|message| AppError::new(INTERNAL, message))
            .unwrap_or_else(|| AppError::new(INTERNAL, "unknown error"));
        wrap_layers(layers, innermost)
    }
}

fn wrap_layers(layers: Vec<String>, innermost: AppError) -> AppError {
    layers
        .into_iter()
        .rev()
        .fold(innermost, |cause, message| AppError::new(INTERNAL, message).with_cause(cause))
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        let err = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os) => err.with_context("os_code", os.to_string()),
            None => err,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        use serde_json::error::Category;

        let code = match error.classify() {
            Category::Data => "JSON/DATA",
            Category::Syntax => "JSON/SYNTAX",
            Category::Eof => "JSON/EOF",
            Category::Io => "JSON/IO",
        };
        let mut err = AppError::new(code, error.to_string());
        if error.line() > 0 {
            err = err.with_contexts([
                ("line", error.line().to_string()),
                ("column", error.column().to_string()),
            ]);
        }
        err
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        use sqlx::Error as E;

        match error {
            E::Database(db) => {
                let code = db
                    .code()
                    .map_or_else(|| "SQLITE/ERROR".to_string(), |c| format!("SQLITE/{c}"));
                let err = AppError::new(code, db.message());
                match db.constraint() {
                    Some(constraint) => err.with_context("constraint", constraint),
                    None => err,
                }
            }
            E::Io(io) => AppError::from(io).with_context("source", "sqlx"),
            E::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            E::PoolTimedOut => {
                AppError::new("SQLX/POOL_TIMEOUT", "Timed out waiting for a database connection")
            }
            E::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "The local store is closed"),
            E::ColumnDecode { index, source } => AppError::new("SQLX/DECODE", source.to_string())
                .with_context("column", index.to_string()),
            E::Decode(source) => AppError::new("SQLX/DECODE", source.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl From<SchemaError> for AppError {
    fn from(error: SchemaError) -> Self {
        let code = match &error {
            SchemaError::UnknownVersion { .. }
            | SchemaError::ChecksumMismatch { .. }
            | SchemaError::NotADatabase { .. } => SCHEMA_INCOMPATIBLE,
            _ => SCHEMA_MIGRATION_FAILED,
        };
        let version = error.version().map(str::to_string);
        let err = AppError::new(code, error.to_string());
        match version {
            Some(version) => err.with_context("version", version),
            None => err,
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        AppError::new(SYNC_REMOTE, error.to_string()).with_context("kind", error.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn local_write_keeps_the_database_cause() {
        let inner = AppError::new("SQLITE/13", "database or disk is full");
        let err = AppError::local_write(inner.clone()).with_context("entity", "resident");
        assert_eq!(err.code(), LOCAL_WRITE_FAILED);
        assert!(!err.is_validation());
        assert_eq!(err.cause(), Some(&inner));
        assert_eq!(
            err.to_string(),
            "[LOCAL_WRITE/FAILED] The record could not be saved on this device. (entity=resident)"
        );
    }

    #[test]
    fn validation_helpers_carry_field_context() {
        let err = AppError::missing_field("lastName");
        assert!(err.is_validation());
        assert_eq!(err.code(), VALIDATION_MISSING_FIELD);
        assert_eq!(err.context().get("field").map(String::as_str), Some("lastName"));
        assert!(!AppError::new("VALIDATIONS/X", "x").is_validation());
    }

    #[test]
    fn anyhow_chain_keeps_an_embedded_app_error() {
        let err = Err::<(), _>(AppError::missing_field("birthdate"))
            .context("import row 4")
            .unwrap_err();
        let app = AppError::from(err);
        assert_eq!(app.code(), INTERNAL);
        assert_eq!(app.message(), "import row 4");
        assert_eq!(app.cause().map(AppError::code), Some(VALIDATION_MISSING_FIELD));
    }

    #[test]
    fn anyhow_chain_without_app_error_nests_messages() {
        let err = Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            .context("write draft")
            .unwrap_err();
        let app = AppError::from(err);
        assert_eq!(app.message(), "write draft");
        assert!(app.cause().unwrap().message().contains("disk full"));
    }

    #[test]
    fn remote_errors_map_to_sync_code() {
        let err = AppError::from(RemoteError::Unavailable("offline".into()));
        assert_eq!(err.code(), SYNC_REMOTE);
        assert_eq!(err.context().get("kind").map(String::as_str), Some("unavailable"));
    }

    #[test]
    fn serialized_shape_omits_empty_parts() {
        let value = serde_json::to_value(AppError::invalid_field("birthdate", "Not a date")).unwrap();
        assert_eq!(value["code"], VALIDATION_INVALID_FIELD);
        assert_eq!(value["context"]["field"], "birthdate");
        assert!(value.get("cause").is_none());
    }
}
