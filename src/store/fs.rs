use super::{Collection, Store, StoreError};
use crate::shared::fs_atomic::{atomic_write_file, remove_if_exists};
use crate::shared::logging::{control_plane_log_path, EventLog};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One directory per collection under a vault root.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    events: EventLog,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            events: EventLog::to_file(control_plane_log_path(&root)),
            root,
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_dir(&self, collection: &Collection) -> PathBuf {
        self.root.join(collection.as_str())
    }

    fn record_path(&self, collection: &Collection, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.starts_with('.') || key.contains('/') || key.contains('\\') {
            return Err(StoreError::InvalidName(format!("invalid record key `{key}`")));
        }
        Ok(self.collection_dir(collection).join(key))
    }
}

impl Store for FsStore {
    fn write(&self, collection: &Collection, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let path = self.record_path(collection, key)?;
        atomic_write_file(&path, body).map_err(|source| io_err(&path, source))
    }

    fn read(&self, collection: &Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.record_path(collection, key)?;
        match fs::read(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    fn keys(&self, collection: &Collection) -> Result<Vec<String>, StoreError> {
        let dir = self.collection_dir(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&dir, err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| io_err(&entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // in-flight temp files from atomic writes
            if name.starts_with('.') {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, collection: &Collection, key: &str) -> Result<bool, StoreError> {
        let path = self.record_path(collection, key)?;
        remove_if_exists(&path).map_err(|source| io_err(&path, source))
    }

    fn describe(&self, collection: &Collection, key: &str) -> String {
        self.collection_dir(collection).join(key).display().to_string()
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
