//! Local-first storage and sync engine for the barangay front-desk terminal.
//!
//! Every write lands in the local SQLite store together with an outbox job;
//! the [`SyncWorker`] replays the outbox against the remote document store
//! whenever the link is up.

pub mod config;
pub mod db;
pub mod drafts;
pub mod duplicate;
pub mod error;
pub mod id;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod sync;
pub mod time;
pub mod tokenize;

pub use config::EngineConfig;
pub use drafts::{Draft, DraftAutosave, DraftKey};
pub use duplicate::DuplicateGuard;
pub use error::{AppError, AppResult};
pub use logging::init_logging;
pub use model::{DuplicateKey, Entity, EntityKind, RecordHeader};
pub use pipeline::{CommitOptions, CommitOutcome, WritePipeline};
pub use query::LiveQuery;
pub use store::{Store, StoreStatus, Table, TableChange};
pub use sync::{DrainOutcome, DrainReport, NetworkMonitor, RemoteStore, SyncWorker};
