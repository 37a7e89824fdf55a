use super::{Collection, Store, StoreError};
use crate::shared::logging::EventLog;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

type Records = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-process store with the same listing order as [`super::FsStore`].
#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<Records>,
    events: EventLog,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            events: EventLog::in_memory(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Records) -> T) -> T {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Store for MemoryStore {
    fn write(&self, collection: &Collection, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.with_records(|records| {
            records
                .entry(collection.as_str().to_string())
                .or_default()
                .insert(key.to_string(), body.to_vec());
        });
        Ok(())
    }

    fn read(&self, collection: &Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.with_records(|records| {
            records
                .get(collection.as_str())
                .and_then(|entries| entries.get(key))
                .cloned()
        }))
    }

    fn keys(&self, collection: &Collection) -> Result<Vec<String>, StoreError> {
        Ok(self.with_records(|records| {
            records
                .get(collection.as_str())
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        }))
    }

    fn delete(&self, collection: &Collection, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_records(|records| {
            records
                .get_mut(collection.as_str())
                .and_then(|entries| entries.remove(key))
                .is_some()
        }))
    }

    fn describe(&self, collection: &Collection, key: &str) -> String {
        format!("memory:{collection}/{key}")
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}
