#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use anyhow::Result;

use barangay_desk_lib::model::{BlotterCase, BlotterCaseInput, Business, Resident};
use barangay_desk_lib::query;
use barangay_desk_lib::CommitOptions;

#[path = "util.rs"]
mod util;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn outbox_summary_follows_commits_and_drains() -> Result<()> {
    let desk = util::desk(false).await;
    let summary = query::outbox_summary(&desk.store);
    let sync_meta = query::sync_meta(&desk.store);
    let mut rx = summary.subscribe();

    tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, Some(s) if s.unsynced() == 0))).await??;

    desk.pipeline
        .commit::<Resident>(util::resident("Cruz", "Juan", "1990-01-01"), CommitOptions::create())
        .await?;
    tokio::time::timeout(WAIT, rx.wait_for(|s| matches!(s, Some(s) if s.pending == 1))).await??;

    desk.network.set_online(true);
    desk.worker.drain_cycle().await?;
    tokio::time::timeout(
        WAIT,
        rx.wait_for(|s| matches!(s, Some(s) if s.synced == 1 && s.unsynced() == 0)),
    )
    .await??;

    let mut meta = sync_meta.subscribe();
    tokio::time::timeout(WAIT, meta.wait_for(|m| matches!(m, Some(m) if m.last_sync_at.is_some())))
        .await??;
    assert_eq!(summary.current().map(|s| s.synced), Some(1));
    Ok(())
}

#[tokio::test]
async fn recent_activity_updates_after_commit() -> Result<()> {
    let desk = util::desk(false).await;
    let activity = query::recent_activity(&desk.store, 10);
    let mut rx = activity.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|a| matches!(a, Some(a) if a.is_empty()))).await??;

    desk.pipeline
        .commit::<Business>(util::business("Aling Nena Store", "Nena Bautista"), CommitOptions::create())
        .await?;
    tokio::time::timeout(WAIT, rx.wait_for(|a| matches!(a, Some(a) if a.len() == 1))).await??;
    let entries = activity.current().unwrap();
    assert_eq!(entries[0].subtitle, "Aling Nena Store");
    Ok(())
}

#[tokio::test]
async fn search_uses_prefix_then_substring() -> Result<()> {
    let desk = util::desk(false).await;
    for (last, first) in [("Dela Cruz", "Juan"), ("Cruz", "Maria"), ("Santos", "Juan")] {
        desk.pipeline
            .commit::<Resident>(util::resident(last, first, "1990-01-01"), CommitOptions::create())
            .await?;
    }

    let names = |found: Vec<Resident>| {
        let mut names: Vec<String> = found.iter().map(|r| r.first_name.clone()).collect();
        names.sort();
        names
    };
    assert_eq!(names(desk.store.search::<Resident>("cruz", 0).await?), vec!["Juan", "Maria"]);
    assert_eq!(names(desk.store.search::<Resident>("cr", 0).await?), vec!["Juan", "Maria"]);
    assert_eq!(names(desk.store.search::<Resident>("  CRUZ   ju ", 0).await?), vec!["Juan"]);
    assert!(desk.store.search::<Resident>("reyes", 0).await?.is_empty());
    assert!(desk.store.search::<Resident>("100%", 0).await?.is_empty());
    assert_eq!(desk.store.search::<Resident>("", 2).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn live_search_sees_new_records() -> Result<()> {
    let desk = util::desk(false).await;
    let results = query::search::<Resident>(&desk.store, "santos", 0);
    let mut rx = results.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|r| matches!(r, Some(r) if r.is_empty()))).await??;

    desk.pipeline
        .commit::<Resident>(util::resident("Santos", "Maria", "1985-06-12"), CommitOptions::create())
        .await?;
    tokio::time::timeout(WAIT, rx.wait_for(|r| matches!(r, Some(r) if r.len() == 1))).await??;
    Ok(())
}

#[tokio::test]
async fn blotter_search_covers_the_narrative() -> Result<()> {
    let desk = util::desk(false).await;
    desk.pipeline
        .commit::<BlotterCase>(
            BlotterCaseInput {
                narrative: Some("Ninakaw ang manok sa likod-bahay".into()),
                ..util::blotter("Pedro Reyes", "Theft")
            },
            CommitOptions::create(),
        )
        .await?;

    let found = desk.store.search::<BlotterCase>("manok", 0).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].complainant, "Pedro Reyes");
    assert!(desk.store.search::<BlotterCase>("kalabaw", 0).await?.is_empty());
    Ok(())
}
