use super::{ConfigError, Settings};
use crate::shared::fs_atomic::atomic_write_file;
use std::path::Path;

/// Validates and writes settings as YAML, replacing the file atomically.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    settings.validate()?;
    let body = serde_yaml::to_string(settings).map_err(|source| ConfigError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(path, body.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })
}
