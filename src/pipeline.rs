//! Local-first commit path: validate, detect duplicates, then write the
//! record, its search tokens, one outbox job and one activity entry in a
//! single transaction. The network is never consulted here.

use serde_json::json;
use tracing::{info, warn};

use crate::drafts::{DraftAutosave, DraftKey};
use crate::duplicate::DuplicateGuard;
use crate::error::VALIDATION_NOT_FOUND;
use crate::id::new_uuid_v7;
use crate::model::{Entity, EntityKind, PrintLog, PrintLogInput};
use crate::store::{activity, entities, meta, ActivityEntry, ActivityStatus, ActivityType, Store, StoreTx, Table};
use crate::sync::outbox;
use crate::sync::{Operation, SyncWorker};
use crate::time::{monotonic_after, now_iso};
use crate::tokenize::tokenize;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Id of the record being edited. `None` creates a new record.
    pub id: Option<String>,
    /// Skip the duplicate check on create.
    pub force_create: bool,
    /// Draft consumed by this commit; cleared once the commit lands.
    pub draft: Option<DraftKey>,
}

impl CommitOptions {
    pub fn create() -> Self {
        CommitOptions::default()
    }

    pub fn edit(id: impl Into<String>) -> Self {
        CommitOptions {
            id: Some(id.into()),
            ..CommitOptions::default()
        }
    }

    pub fn forced(mut self) -> Self {
        self.force_create = true;
        self
    }

    pub fn with_draft(mut self, draft: DraftKey) -> Self {
        self.draft = Some(draft);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome<E> {
    Committed(E),
    /// Nothing was written. Retry with `force_create` to insert anyway.
    PossibleDuplicate { existing: E },
}

impl<E> CommitOutcome<E> {
    pub fn committed(self) -> Option<E> {
        match self {
            CommitOutcome::Committed(record) => Some(record),
            CommitOutcome::PossibleDuplicate { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct WritePipeline {
    store: Store,
    drafts: DraftAutosave,
    duplicates: DuplicateGuard,
    worker: Option<SyncWorker>,
}

impl WritePipeline {
    pub fn new(store: Store, drafts: DraftAutosave) -> Self {
        WritePipeline {
            duplicates: DuplicateGuard::new(store.clone()),
            store,
            drafts,
            worker: None,
        }
    }

    /// Nudge `worker` after every successful commit.
    pub fn with_worker(mut self, worker: SyncWorker) -> Self {
        self.worker = Some(worker);
        self
    }

    pub async fn commit<E: Entity>(
        &self,
        input: E::Input,
        opts: CommitOptions,
    ) -> AppResult<CommitOutcome<E>> {
        let mut record = E::from_input(input)?;

        let editing = match &opts.id {
            Some(id) => {
                if self.store.get::<E>(id).await?.is_none() {
                    return Err(not_found::<E>(id));
                }
                true
            }
            None => false,
        };
        let id = opts
            .id
            .clone()
            .or_else(|| E::fixed_id().map(str::to_string))
            .unwrap_or_else(new_uuid_v7);
        record.header_mut().id = id;

        if !editing && !opts.force_create {
            if let Some(existing) = self.duplicates.check(&record).await? {
                return Ok(CommitOutcome::PossibleDuplicate { existing });
            }
        }

        let kind = E::KIND;
        let mut tx = self
            .store
            .begin(&[
                kind.table(),
                Table::SearchTokens,
                Table::SyncOutbox,
                Table::ActivityLog,
                Table::AuditQueue,
            ])
            .await
            .map_err(AppError::local_write)?;
        let (record, job_id, created) = match write_record(&mut tx, record).await {
            Ok(written) => written,
            Err(err) => {
                tx.rollback().await;
                return Err(local_write_failed::<E>(err));
            }
        };
        tx.commit().await.map_err(local_write_failed::<E>)?;

        info!(
            target: "barangay_desk",
            event = "record_committed",
            entity = kind.as_str(),
            id = %record.id(),
            job_id = %job_id,
            created
        );
        self.after_commit(opts.draft.as_ref()).await;
        Ok(CommitOutcome::Committed(record))
    }

    /// Remove a record locally and queue the remote delete.
    pub async fn delete<E: Entity>(&self, id: &str) -> AppResult<E> {
        let Some(existing) = self.store.get::<E>(id).await? else {
            return Err(not_found::<E>(id));
        };
        let kind = E::KIND;
        let mut tx = self
            .store
            .begin(&[
                kind.table(),
                Table::SearchTokens,
                Table::SyncOutbox,
                Table::ActivityLog,
                Table::AuditQueue,
            ])
            .await
            .map_err(AppError::local_write)?;
        let written = async {
            entities::delete::<E>(tx.conn(), id).await?;
            let job_id =
                outbox::enqueue(tx.conn(), kind, id, Operation::Delete, &json!({ "id": id }))
                    .await?;
            let entry = ActivityEntry::new(
                ActivityType::Delete,
                kind.as_str(),
                id,
                ActivityStatus::Ok,
                format!("{} deleted", kind.label()),
                existing.display_name(),
            )
            .with_details(json!({ "outboxJobId": job_id }));
            activity::append(tx.conn(), &entry).await?;
            Ok::<_, AppError>(job_id)
        }
        .await;
        let job_id = match written {
            Ok(job_id) => job_id,
            Err(err) => {
                tx.rollback().await;
                return Err(local_write_failed::<E>(err));
            }
        };
        tx.commit().await.map_err(local_write_failed::<E>)?;
        info!(
            target: "barangay_desk",
            event = "record_deleted",
            entity = kind.as_str(),
            id = %id,
            job_id = %job_id
        );
        self.after_commit(None).await;
        Ok(existing)
    }

    /// Log a printed document. Print logs never count as duplicates.
    pub async fn record_print(&self, input: PrintLogInput) -> AppResult<PrintLog> {
        match self
            .commit::<PrintLog>(input, CommitOptions::create().forced())
            .await?
        {
            CommitOutcome::Committed(log) => Ok(log),
            CommitOutcome::PossibleDuplicate { .. } => Err(AppError::new(
                crate::error::LOCAL_WRITE_FAILED,
                "Print log was not recorded.",
            )),
        }
    }

    async fn after_commit(&self, draft: Option<&DraftKey>) {
        if let Some(key) = draft {
            if let Err(err) = self.drafts.clear(key).await {
                warn!(
                    target: "barangay_desk",
                    event = "draft_clear_failed",
                    module = %key.module,
                    key = %key.key,
                    error = %err
                );
            }
        }
        if let Some(worker) = &self.worker {
            worker.request_drain();
        }
    }
}

/// Everything that must land together. Returns the stored record, the
/// outbox job id and whether the record was created.
async fn write_record<E: Entity>(
    tx: &mut StoreTx,
    mut record: E,
) -> AppResult<(E, String, bool)> {
    let kind = E::KIND;
    let id = record.id().to_string();
    let now = now_iso();

    let previous = entities::load::<E>(tx.conn(), &id).await?;
    let created = previous.is_none();
    match &previous {
        Some(prev) => {
            record.carry_over(prev);
            let header = record.header_mut();
            header.created_at = prev.header().created_at.clone();
            header.updated_at = monotonic_after(now, &prev.header().updated_at);
        }
        None => {
            let header = record.header_mut();
            header.created_at = now.clone();
            header.updated_at = now;
        }
    }

    if let Some(key) = record.sequence_key() {
        tx.touch(Table::Meta);
        let value = meta::next_sequence(tx.conn(), &key).await?;
        record.apply_sequence(value);
    }

    let tokens = tokenize(record.search_fields());
    record.header_mut().search_tokens = tokens;

    entities::replace_tokens(tx.conn(), kind, &id, &record.header().search_tokens).await?;
    entities::upsert(tx.conn(), &record).await?;

    let payload = serde_json::to_value(&record)?;
    let job_id = outbox::enqueue(tx.conn(), kind, &id, Operation::Upsert, &payload).await?;

    let (activity_type, title) = match (kind, created) {
        (EntityKind::PrintLog, _) => (ActivityType::Print, "Document printed".to_string()),
        (_, true) => (ActivityType::Create, format!("{} created", kind.label())),
        (_, false) => (ActivityType::Update, format!("{} updated", kind.label())),
    };
    let entry = ActivityEntry::new(
        activity_type,
        kind.as_str(),
        &id,
        ActivityStatus::Ok,
        title,
        record.display_name(),
    )
    .with_details(json!({ "outboxJobId": job_id }));
    activity::append(tx.conn(), &entry).await?;

    Ok((record, job_id, created))
}

fn not_found<E: Entity>(id: &str) -> AppError {
    AppError::new(
        VALIDATION_NOT_FOUND,
        format!("No {} with this id exists.", E::KIND.label().to_lowercase()),
    )
    .with_contexts([("id", id), ("entity", E::KIND.as_str())])
}

fn local_write_failed<E: Entity>(err: AppError) -> AppError {
    let err = AppError::local_write(err).with_context("entity", E::KIND.as_str());
    warn!(target: "barangay_desk", event = "local_write_failed", entity = E::KIND.as_str(), error = %err);
    err
}
