//! Live queries: results recomputed whenever a write transaction touching
//! one of their tables commits.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::model::Entity;
use crate::store::{ActivityEntry, Store, SyncMeta, Table, TableChange};
use crate::sync::OutboxSummary;
use crate::AppResult;

/// A query result kept current in the background. `None` until the first
/// computation finishes. Errors are logged and the previous value is kept.
pub struct LiveQuery<T> {
    rx: watch::Receiver<Option<T>>,
    task: JoinHandle<()>,
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F>(store: Store, tables: &[Table], query: F) -> Self
    where
        F: Fn(Store) -> BoxFuture<'static, AppResult<T>> + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(None);
        // Subscribe before the first run so no commit slips between the two.
        let mut changes = store.subscribe();
        let tables = tables.to_vec();
        let task = tokio::spawn(async move {
            refresh(&store, &query, &tx).await;
            loop {
                match changes.recv().await {
                    Ok(change) if tables.contains(&change.table) => {
                        drain_backlog(&mut changes);
                        refresh(&store, &query, &tx).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        refresh(&store, &query, &tx).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        LiveQuery { rx, task }
    }

    pub fn current(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One commit announces each of its tables; recompute once for all of them.
fn drain_backlog(changes: &mut broadcast::Receiver<TableChange>) {
    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

async fn refresh<T, F>(store: &Store, query: &F, tx: &watch::Sender<Option<T>>)
where
    F: Fn(Store) -> BoxFuture<'static, AppResult<T>>,
{
    match query(store.clone()).await {
        Ok(value) => {
            tx.send_replace(Some(value));
        }
        Err(err) => {
            warn!(target: "barangay_desk", event = "live_query_failed", error = %err);
        }
    }
}

pub fn outbox_summary(store: &Store) -> LiveQuery<OutboxSummary> {
    LiveQuery::spawn(store.clone(), &[Table::SyncOutbox], |store| {
        async move { store.outbox_summary().await }.boxed()
    })
}

pub fn sync_meta(store: &Store) -> LiveQuery<SyncMeta> {
    LiveQuery::spawn(store.clone(), &[Table::Meta], |store| {
        async move { store.sync_meta().await }.boxed()
    })
}

pub fn recent_activity(store: &Store, limit: usize) -> LiveQuery<Vec<ActivityEntry>> {
    LiveQuery::spawn(store.clone(), &[Table::ActivityLog], move |store| {
        async move { store.recent_activity(limit).await }.boxed()
    })
}

pub fn search<E: Entity>(store: &Store, text: impl Into<String>, limit: usize) -> LiveQuery<Vec<E>> {
    let text = text.into();
    LiveQuery::spawn(store.clone(), &[E::KIND.table()], move |store| {
        let text = text.clone();
        async move { store.search::<E>(&text, limit).await }.boxed()
    })
}
