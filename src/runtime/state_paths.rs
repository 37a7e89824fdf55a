use super::RuntimeError;
use crate::config::GLOBAL_SETTINGS_FILE_NAME;
use crate::shared::logging::CONTROL_PLANE_LOG;
use std::fs;
use std::path::PathBuf;

/// On-disk layout of a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    pub root: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        [
            "approvals/pending",
            "approvals/approved",
            "approvals/rejected",
            "approvals/done",
            "approvals/quarantine",
            "tasks/active",
            "tasks/done",
            "queue",
            "schedules",
            "logs",
        ]
        .iter()
        .map(|dir| self.root.join(dir))
        .collect()
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(GLOBAL_SETTINGS_FILE_NAME)
    }

    pub fn control_plane_log_path(&self) -> PathBuf {
        self.root.join(CONTROL_PLANE_LOG)
    }
}

pub fn bootstrap_vault(paths: &VaultPaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
