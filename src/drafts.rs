//! Debounced autosave of in-progress form payloads.
//!
//! A save is held in memory for the debounce window and then written to the
//! `drafts` table; newer saves for the same key replace the pending payload
//! and restart the window. All operations on pending state and on the table
//! run under one lock, so a clear can never be overtaken by a delayed write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::store::{Store, Table};
use crate::time::now_iso;
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftKey {
    pub module: String,
    pub key: String,
}

impl DraftKey {
    pub fn new(module: impl Into<String>, key: impl Into<String>) -> Self {
        DraftKey {
            module: module.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub module: String,
    pub key: String,
    pub payload: Value,
    pub updated_at: String,
}

struct Pending {
    generation: u64,
    payload: Value,
    saved_at: String,
}

#[derive(Clone)]
pub struct DraftAutosave {
    inner: Arc<DraftInner>,
}

struct DraftInner {
    store: Store,
    debounce: Duration,
    pending: Mutex<HashMap<DraftKey, Pending>>,
    generation: AtomicU64,
    writes: AtomicU64,
}

impl DraftAutosave {
    pub fn new(store: Store, config: &EngineConfig) -> Self {
        DraftAutosave {
            inner: Arc::new(DraftInner {
                store,
                debounce: config.draft_debounce,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule `payload` to be persisted once no newer save for the same key
    /// arrives within the debounce window.
    pub async fn save(&self, key: &DraftKey, payload: Value) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.pending.lock().await.insert(
            key.clone(),
            Pending {
                generation,
                payload,
                saved_at: now_iso(),
            },
        );

        let autosave = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(autosave.inner.debounce).await;
            if let Err(err) = autosave.flush_generation(&key, generation).await {
                warn!(
                    target: "barangay_desk",
                    event = "draft_persist_failed",
                    module = %key.module,
                    key = %key.key,
                    error = %err
                );
            }
        });
    }

    async fn flush_generation(&self, key: &DraftKey, generation: u64) -> AppResult<()> {
        let mut pending = self.inner.pending.lock().await;
        let Some(entry) = pending.get(key) else {
            return Ok(());
        };
        if entry.generation != generation {
            return Ok(());
        }
        self.persist(key, &entry.payload, &entry.saved_at).await?;
        pending.remove(key);
        Ok(())
    }

    async fn persist(&self, key: &DraftKey, payload: &Value, saved_at: &str) -> AppResult<()> {
        let mut tx = self.inner.store.begin(&[Table::Drafts]).await?;
        sqlx::query(
            "INSERT INTO drafts (module, key, payload, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(module, key) DO UPDATE SET payload = excluded.payload, \
             updated_at = excluded.updated_at",
        )
        .bind(&key.module)
        .bind(&key.key)
        .bind(serde_json::to_string(payload)?)
        .bind(saved_at)
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        debug!(target: "barangay_desk", event = "draft_persisted", module = %key.module, key = %key.key);
        Ok(())
    }

    /// Latest payload for `key`, including one still inside its debounce
    /// window.
    pub async fn load(&self, key: &DraftKey) -> AppResult<Option<Value>> {
        let pending = self.inner.pending.lock().await;
        if let Some(entry) = pending.get(key) {
            return Ok(Some(entry.payload.clone()));
        }
        let raw: Option<String> =
            sqlx::query_scalar("SELECT payload FROM drafts WHERE module = ? AND key = ?")
                .bind(&key.module)
                .bind(&key.key)
                .fetch_optional(&self.inner.store.pool())
                .await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    /// Drop any pending save and delete the stored draft. Returns whether a
    /// row was deleted.
    pub async fn clear(&self, key: &DraftKey) -> AppResult<bool> {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(key);
        let mut tx = self.inner.store.begin(&[Table::Drafts]).await?;
        let removed = sqlx::query("DELETE FROM drafts WHERE module = ? AND key = ?")
            .bind(&key.module)
            .bind(&key.key)
            .execute(tx.conn())
            .await?
            .rows_affected();
        tx.commit().await?;
        debug!(target: "barangay_desk", event = "draft_cleared", module = %key.module, key = %key.key, removed);
        Ok(removed > 0)
    }

    /// Persist every pending save now. Call before shutdown.
    pub async fn flush(&self) -> AppResult<usize> {
        let mut pending = self.inner.pending.lock().await;
        let keys: Vec<DraftKey> = pending.keys().cloned().collect();
        let mut flushed = 0;
        for key in keys {
            if let Some(entry) = pending.get(&key) {
                self.persist(&key, &entry.payload, &entry.saved_at).await?;
                pending.remove(&key);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drafts of one module available for recovery, pending saves included.
    pub async fn list(&self, module: &str) -> AppResult<Vec<Draft>> {
        let pending = self.inner.pending.lock().await;
        let rows = sqlx::query(
            "SELECT module, key, payload, updated_at FROM drafts WHERE module = ? ORDER BY key",
        )
        .bind(module)
        .fetch_all(&self.inner.store.pool())
        .await?;
        let mut drafts = HashMap::new();
        for row in rows {
            let payload: String = row.try_get("payload")?;
            let draft = Draft {
                module: row.try_get("module")?,
                key: row.try_get("key")?,
                payload: serde_json::from_str(&payload)?,
                updated_at: row.try_get("updated_at")?,
            };
            drafts.insert(draft.key.clone(), draft);
        }
        for (key, entry) in pending.iter().filter(|(k, _)| k.module == module) {
            drafts.insert(
                key.key.clone(),
                Draft {
                    module: key.module.clone(),
                    key: key.key.clone(),
                    payload: entry.payload.clone(),
                    updated_at: entry.saved_at.clone(),
                },
            );
        }
        let mut drafts: Vec<Draft> = drafts.into_values().collect();
        drafts.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(drafts)
    }

    /// Number of rows written to the drafts table by this instance.
    pub fn persisted_writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }
}
