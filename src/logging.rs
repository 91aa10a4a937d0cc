use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "BARANGAY_DESK_LOG";
pub const LOG_JSON_ENV: &str = "BARANGAY_DESK_LOG_JSON";
pub const DEFAULT_FILTER: &str = "barangay_desk=info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "barangay-desk.log";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
///
/// Console output goes to stderr so command output on stdout stays
/// machine-readable. When `log_dir` is given, JSON lines are also written to
/// a daily rolling file there.
pub fn init_logging(log_dir: Option<&Path>) {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var(LOG_JSON_ENV)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let stdout_json = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
    });
    let stdout_plain = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
    });

    let file = log_dir.and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!("log directory {} unavailable: {err}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if FILE_GUARD.set(guard).is_err() {
            // A file sink is already installed for this process.
            return None;
        }
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_json)
        .with(stdout_plain)
        .with(file)
        .try_init();
}
