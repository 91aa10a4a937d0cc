#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use serde_json::Value;

use barangay_desk_lib::error::{
    VALIDATION_INVALID_FIELD, VALIDATION_MISSING_FIELD, VALIDATION_NOT_FOUND,
};
use barangay_desk_lib::model::{
    BlotterCase, BlotterCaseInput, Business, PrintLogInput, Resident, ResidentInput, Settings,
    SettingsInput,
};
use barangay_desk_lib::store::{ActivityType, Table};
use barangay_desk_lib::sync::remote::sanitize_payload;
use barangay_desk_lib::sync::{JobStatus, JobType, Operation};
use barangay_desk_lib::{CommitOptions, DrainOutcome, Entity};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn offline_resident_commit_syncs_once_online() -> Result<()> {
    let desk = util::desk(false).await;

    let record = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .expect("committed");

    let pending = desk.store.outbox_jobs(Some(JobStatus::Pending), 10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_type, JobType::ResidentUpsert);
    assert_eq!(pending[0].entity_id, record.id());
    assert!(desk.remote.is_empty("residents"));
    assert_eq!(desk.worker.drain_cycle().await?, DrainOutcome::Offline);

    desk.network.set_online(true);
    let DrainOutcome::Completed(report) = desk.worker.drain_cycle().await? else {
        panic!("expected a completed cycle");
    };
    assert_eq!(report.success_count, 1);
    assert_eq!(report.failure_count, 0);

    let job = desk.store.outbox_job(&pending[0].id).await?.expect("job");
    assert_eq!(job.status, JobStatus::Synced);

    let meta = desk.store.sync_meta().await?;
    assert!(meta.last_sync_at.is_some());
    assert!(meta.last_sync_error.is_none());

    let remote = desk.remote.document("residents", record.id()).expect("remote doc");
    let local = sanitize_payload(&serde_json::to_value(&record)?)?;
    assert_eq!(remote, local);
    Ok(())
}

#[tokio::test]
async fn commits_never_touch_the_network() -> Result<()> {
    let desk = util::desk(false).await;
    desk.remote.set_available(false);

    desk.pipeline
        .commit::<Resident>(util::resident("Santos", "Maria", "1985-06-12"), CommitOptions::create())
        .await?;
    desk.pipeline
        .commit::<BlotterCase>(util::blotter("Reyes, Ana", "Noise complaint"), CommitOptions::create())
        .await?;
    desk.pipeline
        .commit::<Business>(util::business("Sari-Sari ni Aling Nena", "Nena Bautista"), CommitOptions::create())
        .await?;

    assert_eq!(desk.store.count(Table::Residents).await?, 1);
    assert_eq!(desk.store.count(Table::BlotterCases).await?, 1);
    assert_eq!(desk.store.count(Table::Businesses).await?, 1);
    assert_eq!(desk.store.outbox_summary().await?.pending, 3);
    assert_eq!(desk.store.count(Table::ActivityLog).await?, 3);
    assert_eq!(desk.store.count(Table::AuditQueue).await?, 3);
    assert!(desk.remote.attempts().is_empty());
    Ok(())
}

#[tokio::test]
async fn every_commit_appends_exactly_one_job() -> Result<()> {
    let desk = util::desk(false).await;
    let created = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();
    assert_eq!(desk.store.count(Table::SyncOutbox).await?, 1);

    let mut edit = util::resident("Cruz", "Juan", "1990-01-01");
    edit.contact_number = Some("0917 123 4567".into());
    let edited = desk
        .pipeline
        .commit::<Resident>(edit, CommitOptions::edit(created.id()))
        .await?
        .committed()
        .unwrap();

    let jobs = desk.store.outbox_jobs(None, 10).await?;
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.entity_id == created.id()));
    assert!(jobs.iter().all(|j| j.operation == Operation::Upsert));
    assert_eq!(jobs[1].payload["contactNumber"], "0917 123 4567");
    assert_eq!(edited.header.created_at, created.header.created_at);
    assert!(edited.header.updated_at >= created.header.updated_at);

    let kinds: Vec<ActivityType> = desk
        .store
        .activity_for(created.id())
        .await?
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![ActivityType::Create, ActivityType::Update]);
    Ok(())
}

#[tokio::test]
async fn validation_fails_before_any_write() -> Result<()> {
    let desk = util::desk(false).await;

    let missing = ResidentInput {
        first_name: Some("Juan".into()),
        birthdate: Some("1990-01-01".into()),
        ..ResidentInput::default()
    };
    let err = desk
        .pipeline
        .commit::<Resident>(missing, CommitOptions::create())
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_MISSING_FIELD);
    assert_eq!(err.context().get("field").map(String::as_str), Some("lastName"));

    let err = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "01/01/1990"), CommitOptions::create())
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_INVALID_FIELD);

    assert_eq!(desk.store.count(Table::Residents).await?, 0);
    assert_eq!(desk.store.count(Table::SyncOutbox).await?, 0);
    assert_eq!(desk.store.count(Table::ActivityLog).await?, 0);
    Ok(())
}

#[tokio::test]
async fn editing_an_unknown_id_is_rejected() -> Result<()> {
    let desk = util::desk(false).await;
    let err = desk
        .pipeline
        .commit::<Resident>(
            util::resident("Cruz", "Juan", "1990-01-01"),
            CommitOptions::edit("0190a1b2-0000-7000-8000-000000000000"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), VALIDATION_NOT_FOUND);
    assert_eq!(desk.store.count(Table::Residents).await?, 0);
    Ok(())
}

#[tokio::test]
async fn updated_at_never_moves_backwards() -> Result<()> {
    let desk = util::desk(false).await;
    let created = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();

    // Simulate a record last written by a device with a fast clock.
    let future = "2999-01-01T00:00:00.000Z";
    sqlx::query("UPDATE residents SET doc = json_set(doc, '$.updatedAt', ?) WHERE id = ?")
        .bind(future)
        .bind(created.id())
        .execute(&desk.store.pool())
        .await?;

    let edited = desk
        .pipeline
        .commit::<Resident>(
            util::resident("Cruz", "Juan", "1990-01-01"),
            CommitOptions::edit(created.id()),
        )
        .await?
        .committed()
        .unwrap();
    assert_eq!(edited.header.updated_at, future);
    assert_eq!(edited.header.created_at, created.header.created_at);
    Ok(())
}

#[tokio::test]
async fn blotter_cases_are_numbered_per_year() -> Result<()> {
    let desk = util::desk(false).await;
    let first = desk
        .pipeline
        .commit::<BlotterCase>(util::blotter("Reyes, Ana", "Noise complaint"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();
    let second = desk
        .pipeline
        .commit::<BlotterCase>(util::blotter("Lim, Ben", "Boundary dispute"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();

    let year = &first.header.created_at[..4];
    assert_eq!(first.case_number.as_deref(), Some(format!("BLT-{year}-0001").as_str()));
    assert_eq!(second.case_number.as_deref(), Some(format!("BLT-{year}-0002").as_str()));
    assert!(first.header.search_tokens.contains(&format!("BLT-{year}-0001")));

    // An edit without a number keeps the assigned one.
    let edited = desk
        .pipeline
        .commit::<BlotterCase>(
            BlotterCaseInput {
                status: Some("settled".into()),
                ..util::blotter("Reyes, Ana", "Noise complaint")
            },
            CommitOptions::edit(first.id()),
        )
        .await?
        .committed()
        .unwrap();
    assert_eq!(edited.case_number, first.case_number);
    assert_eq!(
        desk.store.meta_value(&format!("blotterSeq:{year}")).await?.as_deref(),
        Some("2")
    );

    let settled = desk
        .store
        .list_by_index::<BlotterCase>("status", "settled")
        .await?;
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].id(), first.id());
    Ok(())
}

#[tokio::test]
async fn settings_is_a_singleton_document() -> Result<()> {
    let desk = util::desk(false).await;
    let first = desk
        .pipeline
        .commit::<Settings>(
            SettingsInput {
                barangay_name: Some("San Isidro".into()),
                municipality: Some("Tanay".into()),
                ..SettingsInput::default()
            },
            CommitOptions::create(),
        )
        .await?
        .committed()
        .unwrap();
    assert_eq!(first.id(), "app");

    let second = desk
        .pipeline
        .commit::<Settings>(
            SettingsInput {
                province: Some("Rizal".into()),
                ..SettingsInput::default()
            },
            CommitOptions::create(),
        )
        .await?
        .committed()
        .unwrap();
    assert_eq!(second.id(), "app");
    assert_eq!(second.barangay_name.as_deref(), Some("San Isidro"));
    assert_eq!(second.province.as_deref(), Some("Rizal"));
    assert_eq!(desk.store.count(Table::Settings).await?, 1);
    Ok(())
}

#[tokio::test]
async fn delete_queues_a_remote_delete() -> Result<()> {
    let desk = util::desk(true).await;
    let record = desk
        .pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();
    desk.worker.drain_cycle().await?;
    assert!(desk.remote.document("residents", record.id()).is_some());

    desk.pipeline.delete::<Resident>(record.id()).await?;
    assert!(desk.store.get::<Resident>(record.id()).await?.is_none());
    assert!(desk.store.search_tokens_of("resident", record.id()).await?.is_empty());

    let pending = desk.store.outbox_jobs(Some(JobStatus::Pending), 10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, Operation::Delete);

    desk.worker.drain_cycle().await?;
    assert!(desk.remote.document("residents", record.id()).is_none());

    let err = desk.pipeline.delete::<Resident>(record.id()).await.unwrap_err();
    assert_eq!(err.code(), VALIDATION_NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn printing_is_logged_as_print_activity() -> Result<()> {
    let desk = util::desk(false).await;
    let log = desk
        .pipeline
        .record_print(PrintLogInput {
            document_type: Some("certificate".into()),
            title: Some("Barangay Clearance - Cruz, Juan".into()),
            ..PrintLogInput::default()
        })
        .await?;
    assert_eq!(log.copies, 1);

    let activity = desk.store.recent_activity(5).await?;
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].kind, ActivityType::Print);
    assert_eq!(activity[0].subtitle, "Barangay Clearance - Cruz, Juan");

    let jobs = desk.store.outbox_jobs(None, 5).await?;
    assert_eq!(jobs[0].job_type, JobType::PrintlogUpsert);
    assert_eq!(
        activity[0].details.as_ref().and_then(|d| d.get("outboxJobId")),
        Some(&Value::String(jobs[0].id.clone()))
    );
    Ok(())
}
