use super::entity::{decode, encode, id_from_key, key_for};
use super::{Collection, Entity, FsStore, MemoryStore, Store, StoreError};
use crate::shared::logging::EventLog;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Typed access to a [`Store`]. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FsStore::new(root)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn events(&self) -> &EventLog {
        self.store.events()
    }

    pub fn save<E: Entity>(&self, entity: &E, collection: &Collection) -> Result<(), StoreError> {
        let body = encode(entity)?;
        self.store
            .write(collection, &key_for::<E>(entity.entity_id()), &body)
    }

    pub fn load<E: Entity>(
        &self,
        id: &str,
        collection: &Collection,
    ) -> Result<Option<E>, StoreError> {
        let key = key_for::<E>(id);
        match self.store.read(collection, &key)? {
            Some(raw) => decode(&raw, &self.store.describe(collection, &key)).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains<E: Entity>(&self, id: &str, collection: &Collection) -> Result<bool, StoreError> {
        Ok(self.store.read(collection, &key_for::<E>(id))?.is_some())
    }

    /// Record ids in listing order.
    pub fn ids<E: Entity>(&self, collection: &Collection) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .keys(collection)?
            .iter()
            .filter_map(|key| id_from_key::<E>(key).map(str::to_string))
            .collect())
    }

    /// Every decodable record in `collection`, in listing order. Records
    /// that fail to decode are reported to the event log and skipped so a
    /// single corrupt file cannot stall a queue.
    pub fn list<E: Entity>(&self, collection: &Collection) -> Result<Vec<E>, StoreError> {
        self.list_excluding(collection, &[])
    }

    /// Like [`Vault::list`], but hides ids that also exist in any of
    /// `later`: a crash between the write and the delete of
    /// [`Vault::move_state`] leaves the destination copy authoritative.
    pub fn list_excluding<E: Entity>(
        &self,
        collection: &Collection,
        later: &[&Collection],
    ) -> Result<Vec<E>, StoreError> {
        let mut shadowed = BTreeSet::new();
        for other in later {
            shadowed.extend(self.ids::<E>(other)?);
        }

        let mut records = Vec::new();
        for key in self.store.keys(collection)? {
            let Some(id) = id_from_key::<E>(&key) else {
                continue;
            };
            if shadowed.contains(id) {
                continue;
            }
            let Some(raw) = self.store.read(collection, &key)? else {
                continue;
            };
            match decode::<E>(&raw, &self.store.describe(collection, &key)) {
                Ok(record) => records.push(record),
                Err(err) => self.events().warn(
                    "store.decode_failed",
                    json!({ "collection": collection.as_str(), "key": key, "error": err.to_string() }),
                ),
            }
        }
        Ok(records)
    }

    /// Writes `entity` into `to`, then deletes its record from `from`.
    ///
    /// Returns `false` without writing anything when the source record is
    /// already gone (a concurrent transition won); callers re-list.
    pub fn move_state<E: Entity>(
        &self,
        entity: &E,
        from: &Collection,
        to: &Collection,
    ) -> Result<bool, StoreError> {
        let key = key_for::<E>(entity.entity_id());
        if self.store.read(from, &key)?.is_none() {
            return Ok(false);
        }
        self.save(entity, to)?;
        if from != to {
            self.store.delete(from, &key)?;
        }
        Ok(true)
    }

    pub fn remove<E: Entity>(&self, id: &str, collection: &Collection) -> Result<bool, StoreError> {
        self.store.delete(collection, &key_for::<E>(id))
    }

    /// Deletes stale copies left behind by an interrupted move. `lifecycle`
    /// lists collections from earliest to latest state; when an id appears
    /// in several, the latest copy wins. Returns the ids that were cleaned.
    pub fn reconcile<E: Entity>(&self, lifecycle: &[&Collection]) -> Result<Vec<String>, StoreError> {
        let mut seen_later: BTreeSet<String> = BTreeSet::new();
        let mut cleaned = BTreeSet::new();
        for collection in lifecycle.iter().rev() {
            let ids = self.ids::<E>(collection)?;
            for id in &ids {
                if seen_later.contains(id) && self.remove::<E>(id, collection)? {
                    self.events().warn(
                        "store.reconciled",
                        json!({ "collection": collection.as_str(), "id": id }),
                    );
                    cleaned.insert(id.clone());
                }
            }
            seen_later.extend(ids);
        }
        Ok(cleaned.into_iter().collect())
    }
}
