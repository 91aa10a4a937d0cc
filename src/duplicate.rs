use tracing::info;

use crate::model::{DuplicateKey, Entity};
use crate::store::Store;
use crate::AppResult;

/// Exact-match lookup on a record kind's normalized composite key.
#[derive(Clone)]
pub struct DuplicateGuard {
    store: Store,
}

impl DuplicateGuard {
    pub fn new(store: Store) -> Self {
        DuplicateGuard { store }
    }

    /// First stored record with the same key, oldest first.
    pub async fn find_duplicate<E: Entity>(&self, key: &DuplicateKey) -> AppResult<Option<E>> {
        let found = self.store.find_by_dup_key::<E>(key).await?;
        if let Some(existing) = &found {
            info!(
                target: "barangay_desk",
                event = "duplicate_found",
                entity = E::KIND.as_str(),
                existing_id = %existing.id()
            );
        }
        Ok(found)
    }

    /// Duplicate of `candidate`, ignoring `candidate` itself. Kinds without a
    /// duplicate key never match.
    pub async fn check<E: Entity>(&self, candidate: &E) -> AppResult<Option<E>> {
        let Some(key) = candidate.duplicate_key() else {
            return Ok(None);
        };
        Ok(self
            .find_duplicate::<E>(&key)
            .await?
            .filter(|existing| existing.id() != candidate.id()))
    }
}
