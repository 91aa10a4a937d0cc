use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DB_ENV: &str = "BARANGAY_DESK_DB";
pub const LOG_DIR_ENV: &str = "BARANGAY_DESK_LOG_DIR";
pub const SYNC_INTERVAL_ENV: &str = "BARANGAY_DESK_SYNC_INTERVAL_MS";
pub const DRAFT_DEBOUNCE_ENV: &str = "BARANGAY_DESK_DRAFT_DEBOUNCE_MS";
pub const MAX_ATTEMPTS_ENV: &str = "BARANGAY_DESK_MAX_ATTEMPTS";

const APP_DIR: &str = "barangay-desk";
const DB_FILE: &str = "barangay-desk.sqlite3";

/// Engine settings, injected into every component that needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    #[serde(with = "duration_ms")]
    pub draft_debounce: Duration,
    #[serde(with = "duration_ms")]
    pub sync_interval: Duration,
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,
    #[serde(with = "duration_ms")]
    pub backoff_cap: Duration,
    /// Failures before a job is parked as `dead`. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub audit_ship_batch: u32,
    pub search_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            db_path: default_db_path(),
            log_dir: None,
            draft_debounce: Duration::from_millis(500),
            sync_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(15),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            max_attempts: Some(10),
            audit_ship_batch: 50,
            search_limit: 50,
        }
    }
}

impl EngineConfig {
    /// Defaults pointed at an explicit database file.
    pub fn for_path(db_path: impl AsRef<Path>) -> Self {
        EngineConfig {
            db_path: db_path.as_ref().to_path_buf(),
            ..EngineConfig::default()
        }
    }

    /// Defaults with `BARANGAY_DESK_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Some(path) = env_non_empty(DB_ENV) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(dir) = env_non_empty(LOG_DIR_ENV) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = env_parse::<u64>(SYNC_INTERVAL_ENV) {
            self.sync_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>(DRAFT_DEBOUNCE_ENV) {
            self.draft_debounce = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>(MAX_ATTEMPTS_ENV) {
            self.max_attempts = (attempts > 0).then_some(attempts);
        }
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(DB_FILE)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_non_empty(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                target: "barangay_desk",
                event = "config_env_ignored",
                key,
                value = %raw
            );
            None
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"dbPath":"/tmp/x.sqlite3","syncInterval":1500}"#)
                .expect("parse config");
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.sqlite3"));
        assert_eq!(config.sync_interval, Duration::from_millis(1500));
        assert_eq!(config.max_attempts, Some(10));
        assert_eq!(config.draft_debounce, Duration::from_millis(500));
    }

    #[test]
    fn default_path_ends_with_app_file() {
        let path = default_db_path();
        assert!(path.ends_with("barangay-desk/barangay-desk.sqlite3"));
    }

    #[test]
    fn for_path_overrides_only_the_database() {
        let config = EngineConfig::for_path("/data/desk.sqlite3");
        assert_eq!(config.db_path, PathBuf::from("/data/desk.sqlite3"));
        assert_eq!(config.backoff_cap, EngineConfig::default().backoff_cap);
    }
}
