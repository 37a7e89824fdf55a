use super::{default_global_config_path, ConfigError, Settings};
use std::path::Path;

/// Reads and validates settings. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let settings = if path.exists() {
        Settings::from_path(path)?
    } else {
        Settings::default()
    };
    settings.validate()?;
    Ok(settings)
}

pub fn load_global_settings() -> Result<Settings, ConfigError> {
    load_settings(&default_global_config_path()?)
}
