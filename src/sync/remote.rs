//! Contract for the backing document store, plus an in-memory
//! implementation with failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("remote store rejected the write: {0}")]
    Rejected(String),
    #[error("remote store timed out: {0}")]
    Timeout(String),
}

impl RemoteError {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Unavailable(_) => "unavailable",
            RemoteError::Rejected(_) => "rejected",
            RemoteError::Timeout(_) => "timeout",
        }
    }
}

/// A document store addressed by collection and id.
///
/// `upsert` with `merge = true` must overwrite only the given top-level
/// fields, so replaying the same payload is harmless.
pub trait RemoteStore: Send + Sync {
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        doc: &'a Map<String, Value>,
        merge: bool,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str)
        -> BoxFuture<'a, Result<(), RemoteError>>;

    fn health_check(&self) -> BoxFuture<'_, Result<(), RemoteError>>;
}

/// Turn an outbox payload into a remote document. The payload must be an
/// object. `null` values are sent as they are: a merge upsert only touches
/// the fields it carries, so a cleared field has to arrive as an explicit
/// `null` to overwrite the old remote value.
pub fn sanitize_payload(payload: &Value) -> AppResult<Map<String, Value>> {
    match payload {
        Value::Object(map) => Ok(map.clone()),
        _ => Err(AppError::new(
            crate::error::SYNC_PAYLOAD,
            "Outbox payload is not a JSON object.",
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Upsert,
    Delete,
}

/// One call observed by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttempt {
    pub op: RemoteOp,
    pub collection: String,
    pub id: String,
    pub ok: bool,
}

#[derive(Default)]
struct RemoteState {
    collections: HashMap<String, HashMap<String, Map<String, Value>>>,
    available: bool,
    failing: HashSet<(String, String)>,
    attempts: Vec<RemoteAttempt>,
    latency: Duration,
}

/// Process-local document store used by tests and demo mode.
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        InMemoryRemote {
            state: Mutex::new(RemoteState {
                available: true,
                ..RemoteState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// When false every call fails with [`RemoteError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Reject writes to one document until [`InMemoryRemote::clear_failures`].
    pub fn fail_document(&self, collection: &str, id: &str) {
        self.state()
            .failing
            .insert((collection.to_string(), id.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Map<String, Value>> {
        self.state()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.state()
            .collections
            .get(collection)
            .map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    pub fn attempts(&self) -> Vec<RemoteAttempt> {
        self.state().attempts.clone()
    }

    fn latency(&self) -> Duration {
        self.state().latency
    }

    fn check(&self, state: &RemoteState, collection: &str, id: &str) -> Result<(), RemoteError> {
        if !state.available {
            return Err(RemoteError::Unavailable("network unreachable".into()));
        }
        if state
            .failing
            .contains(&(collection.to_string(), id.to_string()))
        {
            return Err(RemoteError::Rejected(format!("{collection}/{id} rejected")));
        }
        Ok(())
    }
}

impl RemoteStore for InMemoryRemote {
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        doc: &'a Map<String, Value>,
        merge: bool,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let latency = self.latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let mut state = self.state();
            let result = self.check(&state, collection, id);
            state.attempts.push(RemoteAttempt {
                op: RemoteOp::Upsert,
                collection: collection.to_string(),
                id: id.to_string(),
                ok: result.is_ok(),
            });
            result?;
            let docs = state.collections.entry(collection.to_string()).or_default();
            match docs.get_mut(id) {
                Some(existing) if merge => {
                    for (key, value) in doc {
                        existing.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    docs.insert(id.to_string(), doc.clone());
                }
            }
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let latency = self.latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let mut state = self.state();
            let result = self.check(&state, collection, id);
            state.attempts.push(RemoteAttempt {
                op: RemoteOp::Delete,
                collection: collection.to_string(),
                id: id.to_string(),
                ok: result.is_ok(),
            });
            result?;
            if let Some(docs) = state.collections.get_mut(collection) {
                docs.remove(id);
            }
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            if self.state().available {
                Ok(())
            } else {
                Err(RemoteError::Unavailable("network unreachable".into()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_keeps_nulls_and_requires_object() {
        let payload = json!({
            "id": "r1",
            "middleName": null,
            "nested": {"a": null, "b": 1},
            "list": [1, null, 2]
        });
        let doc = sanitize_payload(&payload).unwrap();
        assert_eq!(Value::Object(doc), payload);

        let err = sanitize_payload(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), crate::error::SYNC_PAYLOAD);
    }

    #[tokio::test]
    async fn merge_with_null_clears_the_remote_field() {
        let remote = InMemoryRemote::new();
        let first = sanitize_payload(&json!({"id": "r1", "remarks": "old"})).unwrap();
        remote.upsert("residents", "r1", &first, true).await.unwrap();
        let cleared = sanitize_payload(&json!({"id": "r1", "remarks": null})).unwrap();
        remote.upsert("residents", "r1", &cleared, true).await.unwrap();

        let stored = remote.document("residents", "r1").unwrap();
        assert_eq!(stored.get("remarks"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn merge_upsert_is_idempotent_and_keeps_other_fields() {
        let remote = InMemoryRemote::new();
        let first = sanitize_payload(&json!({"id": "r1", "a": 1, "b": 2})).unwrap();
        remote.upsert("residents", "r1", &first, true).await.unwrap();
        let partial = sanitize_payload(&json!({"id": "r1", "b": 3})).unwrap();
        remote.upsert("residents", "r1", &partial, true).await.unwrap();
        remote.upsert("residents", "r1", &partial, true).await.unwrap();

        let stored = remote.document("residents", "r1").unwrap();
        assert_eq!(Value::Object(stored), json!({"id": "r1", "a": 1, "b": 3}));
        assert_eq!(remote.len("residents"), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_reported_and_logged() {
        let remote = InMemoryRemote::new();
        let doc = sanitize_payload(&json!({"id": "x"})).unwrap();
        remote.fail_document("residents", "x");
        let err = remote.upsert("residents", "x", &doc, true).await.unwrap_err();
        assert_eq!(err.kind(), "rejected");

        remote.clear_failures();
        remote.set_available(false);
        assert!(remote.health_check().await.is_err());
        let err = remote.delete("residents", "x").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));

        let attempts = remote.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| !a.ok));
    }
}
