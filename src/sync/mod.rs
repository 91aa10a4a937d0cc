//! Outbox-driven replication to the remote document store.

pub mod job;
pub mod network;
pub mod outbox;
pub mod remote;
pub mod worker;

pub use job::{JobStatus, JobType, Operation, OutboxJob};
pub use network::NetworkMonitor;
pub use outbox::OutboxSummary;
pub use remote::{InMemoryRemote, RemoteError, RemoteStore};
pub use worker::{DrainOutcome, DrainReport, SyncWorker, AUDIT_COLLECTION};
