pub mod error;
pub mod load;
pub mod paths;
pub mod save;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_global_settings, load_settings};
pub use paths::{
    default_global_config_path, default_vault_root, GLOBAL_SETTINGS_FILE_NAME, GLOBAL_STATE_DIR,
};
pub use save::save_settings;
pub use settings::{
    ApprovalSettings, HealthSettings, PollerSettings, RetrySettings, SchedulerSettings, Settings,
    TaskSettings,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn empty_document_uses_defaults() {
        let settings: Settings = serde_yaml::from_str("{}").expect("parse settings");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.approvals.default_expiration_hours, 24);
        assert_eq!(settings.tasks.default_max_iterations, 10);
        assert_eq!(settings.health.failure_threshold, 3);
        assert_eq!(settings.scheduler.default_timezone, "UTC");
        assert_eq!(settings.poll_interval(), Duration::from_secs(30));
        settings.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_sections_fill_remaining_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r#"
vault_root: /srv/vault
health:
  retry:
    max_attempts: 5
scheduler:
  default_timezone: Europe/Berlin
"#,
        )
        .expect("parse settings");
        assert_eq!(settings.vault_root, Some(PathBuf::from("/srv/vault")));
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_millis(2_000));
        assert_eq!(settings.missed_grace(), chrono::Duration::seconds(60));
        settings.validate().expect("valid");
    }

    #[test]
    fn validation_names_the_offending_key() {
        let cases = [
            ("vault_root: relative/path", "vault_root"),
            (
                "approvals:\n  default_expiration_hours: 0",
                "approvals.default_expiration_hours",
            ),
            ("tasks:\n  default_max_iterations: 0", "tasks.default_max_iterations"),
            ("health:\n  failure_threshold: 0", "health.failure_threshold"),
            (
                "health:\n  retry:\n    base_delay_ms: 500\n    max_delay_ms: 100",
                "health.retry.max_delay_ms",
            ),
            (
                "scheduler:\n  default_timezone: Mars/Base",
                "scheduler.default_timezone",
            ),
            ("poller:\n  interval_seconds: 0", "poller.interval_seconds"),
        ];
        for (yaml, key) in cases {
            let settings: Settings = serde_yaml::from_str(yaml).expect("parse settings");
            match settings.validate() {
                Err(ConfigError::Settings(message)) => {
                    assert!(message.contains(key), "{message} should mention {key}");
                }
                other => panic!("unexpected result for {key}: {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_yaml::from_str::<Settings>("approvals:\n  expire_hours: 3")
            .expect_err("unknown field must fail");
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn load_settings_reads_file_and_defaults_when_missing() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("config.yaml");
        let missing = load_settings(&path).expect("missing file yields defaults");
        assert_eq!(missing, Settings::default());

        fs::write(&path, "tasks:\n  default_max_iterations: 4\n").expect("write config");
        let loaded = load_settings(&path).expect("load");
        assert_eq!(loaded.tasks.default_max_iterations, 4);

        fs::write(&path, "tasks: [").expect("write broken config");
        assert!(matches!(
            load_settings(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn save_settings_writes_loadable_yaml() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("nested/config.yaml");
        let mut settings = Settings::default();
        settings.poller.interval_seconds = 5;
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path).expect("reload"), settings);

        settings.poller.interval_seconds = 0;
        assert!(matches!(
            save_settings(&path, &settings),
            Err(ConfigError::Settings(_))
        ));
    }

    #[test]
    fn default_paths_live_under_home_vaultgate() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let temp = tempdir().expect("temp dir");
        let old_home = std::env::var_os("HOME");
        std::env::set_var("HOME", temp.path());

        let path = default_global_config_path().expect("resolve global config path");
        assert_eq!(path, temp.path().join(".vaultgate/config.yaml"));
        let root = Settings::default()
            .resolve_vault_root()
            .expect("resolve vault root");
        assert_eq!(root, temp.path().join(".vaultgate"));

        if let Some(value) = old_home {
            std::env::set_var("HOME", value);
        } else {
            std::env::remove_var("HOME");
        }
    }
}
