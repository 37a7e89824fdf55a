//! Directory-as-state-machine persistence.
//!
//! A [`Store`] holds opaque records grouped into named collections (one
//! directory each on disk). [`Vault`] layers typed entities on top and
//! implements state transitions as "write to destination, then delete from
//! source".

pub mod entity;
pub mod fs;
pub mod memory;
pub mod vault;

pub use crate::shared::errors::StoreError;
pub use entity::{Entity, RecordFormat};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use vault::Vault;

use crate::shared::ids::validate_identifier_value;
use crate::shared::logging::EventLog;

/// Name of a state directory, e.g. `approvals/pending` or `queue/gmail`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Collection(String);

impl Collection {
    pub fn new(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::InvalidName(
                "collection name must be non-empty".to_string(),
            ));
        }
        for segment in trimmed.split('/') {
            validate_identifier_value("collection segment", segment)
                .map_err(StoreError::InvalidName)?;
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Built-in collection names that are known to be valid.
    pub(crate) fn known(raw: &str) -> Self {
        debug_assert!(Self::new(raw).is_ok(), "invalid built-in collection `{raw}`");
        Self(raw.to_string())
    }

    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        validate_identifier_value("collection segment", segment).map_err(StoreError::InvalidName)?;
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Raw record storage. Keys are file names; implementations return
/// [`Store::keys`] sorted by name so every backend lists in the same order.
/// No locking happens here; callers serialize access to a given key.
pub trait Store: Send + Sync {
    fn write(&self, collection: &Collection, key: &str, body: &[u8]) -> Result<(), StoreError>;

    fn read(&self, collection: &Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn keys(&self, collection: &Collection) -> Result<Vec<String>, StoreError>;

    fn delete(&self, collection: &Collection, key: &str) -> Result<bool, StoreError>;

    /// Human-readable location of a record, used in error messages.
    fn describe(&self, collection: &Collection, key: &str) -> String;

    fn events(&self) -> &EventLog;
}
