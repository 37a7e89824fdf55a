use crate::config::ConfigError;
use std::path::PathBuf;

pub const GLOBAL_STATE_DIR: &str = ".vaultgate";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "config.yaml";

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(ConfigError::HomeDirectoryUnavailable)
}

pub fn default_global_config_path() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?
        .join(GLOBAL_STATE_DIR)
        .join(GLOBAL_SETTINGS_FILE_NAME))
}

/// Vault root used when settings leave `vault_root` unset.
pub fn default_vault_root() -> Result<PathBuf, ConfigError> {
    Ok(home_dir()?.join(GLOBAL_STATE_DIR))
}
