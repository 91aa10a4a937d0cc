#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;

use barangay_desk_lib::model::{Business, CertificateInput, CertificateIssuance, Resident};
use barangay_desk_lib::store::Table;
use barangay_desk_lib::{CommitOptions, CommitOutcome, DuplicateGuard, DuplicateKey, Entity};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn same_name_and_birthdate_is_a_possible_duplicate() -> Result<()> {
    let desk = util::desk(false).await;
    let original = desk
        .pipeline
        .commit::<Resident>(util::resident("Dela Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();

    // Case and spacing differences still match.
    let outcome = desk
        .pipeline
        .commit::<Resident>(util::resident("  dela   cruz ", "JUAN", "1990-01-01"), CommitOptions::create())
        .await?;
    match outcome {
        CommitOutcome::PossibleDuplicate { existing } => assert_eq!(existing.id(), original.id()),
        other => panic!("expected a duplicate, got {other:?}"),
    }
    assert_eq!(desk.store.count(Table::Residents).await?, 1);
    assert_eq!(desk.store.count(Table::SyncOutbox).await?, 1);

    let forced = desk
        .pipeline
        .commit::<Resident>(
            util::resident("Dela Cruz", "Juan", "1990-01-01"),
            CommitOptions::create().forced(),
        )
        .await?
        .committed()
        .unwrap();
    assert_ne!(forced.id(), original.id());
    assert_eq!(desk.store.count(Table::Residents).await?, 2);

    // A different birthdate is a different person.
    let other = desk
        .pipeline
        .commit::<Resident>(util::resident("Dela Cruz", "Juan", "1991-01-01"), CommitOptions::create())
        .await?;
    assert!(other.committed().is_some());
    Ok(())
}

#[tokio::test]
async fn edits_do_not_trip_the_guard() -> Result<()> {
    let desk = util::desk(false).await;
    let original = desk
        .pipeline
        .commit::<Business>(util::business("Aling Nena Store", "Nena Bautista"), CommitOptions::create())
        .await?
        .committed()
        .unwrap();
    let edited = desk
        .pipeline
        .commit::<Business>(
            util::business("Aling Nena Store", "Nena Bautista"),
            CommitOptions::edit(original.id()),
        )
        .await?;
    assert!(edited.committed().is_some());
    Ok(())
}

#[tokio::test]
async fn guard_matches_exact_keys_only() -> Result<()> {
    let desk = util::desk(false).await;
    desk.pipeline
        .commit::<Business>(util::business("Aling Nena Store", "Nena Bautista"), CommitOptions::create())
        .await?;
    let guard = DuplicateGuard::new(desk.store.clone());

    let key = DuplicateKey::from_parts(&["aling nena store", "nena bautista"]).unwrap();
    assert!(guard.find_duplicate::<Business>(&key).await?.is_some());

    let near = DuplicateKey::from_parts(&["aling nena stor", "nena bautista"]).unwrap();
    assert!(guard.find_duplicate::<Business>(&near).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn certificates_can_be_reissued() -> Result<()> {
    let desk = util::desk(false).await;
    let input = || CertificateInput {
        resident_id: Some("resident-1".into()),
        certificate_type: Some("clearance".into()),
        issued_date: Some("2024-05-02".into()),
        ..CertificateInput::default()
    };
    for _ in 0..2 {
        let outcome = desk
            .pipeline
            .commit::<CertificateIssuance>(input(), CommitOptions::create())
            .await?;
        assert!(outcome.committed().is_some());
    }
    assert_eq!(desk.store.count(Table::CertificateIssuances).await?, 2);
    Ok(())
}
