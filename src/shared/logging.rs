use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

pub const CONTROL_PLANE_LOG: &str = "logs/control_plane.log";

pub fn control_plane_log_path(vault_root: &Path) -> PathBuf {
    vault_root.join(CONTROL_PLANE_LOG)
}

#[derive(Debug, Clone)]
enum Sink {
    File(PathBuf),
    Memory(Arc<Mutex<Vec<String>>>),
    Disabled,
}

/// Best-effort JSON-lines event log. A failed write is dropped, never
/// surfaced to the operation that produced the event.
#[derive(Debug, Clone)]
pub struct EventLog {
    sink: Sink,
}

impl EventLog {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            sink: Sink::File(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            sink: Sink::Memory(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    pub fn disabled() -> Self {
        Self {
            sink: Sink::Disabled,
        }
    }

    pub fn info(&self, event: &str, fields: Value) {
        self.record("info", event, fields);
    }

    pub fn warn(&self, event: &str, fields: Value) {
        self.record("warn", event, fields);
    }

    pub fn error(&self, event: &str, fields: Value) {
        self.record("error", event, fields);
    }

    pub fn record(&self, level: &str, event: &str, fields: Value) {
        if matches!(self.sink, Sink::Disabled) {
            return;
        }
        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        payload.insert("level".to_string(), Value::String(level.to_string()));
        payload.insert("event".to_string(), Value::String(event.to_string()));
        if let Value::Object(extra) = fields {
            payload.extend(extra);
        }
        let Ok(line) = serde_json::to_string(&Value::Object(payload)) else {
            return;
        };

        match &self.sink {
            Sink::File(path) => {
                let _ = append_line(path, &line);
            }
            Sink::Memory(lines) => {
                lines
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(line);
            }
            Sink::Disabled => {}
        }
    }

    /// Lines captured so far. File-backed logs are read back from disk.
    pub fn lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::File(path) => fs::read_to_string(path)
                .map(|raw| raw.lines().map(str::to_string).collect())
                .unwrap_or_default(),
            Sink::Memory(lines) => lines
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            Sink::Disabled => Vec::new(),
        }
    }

    pub fn contains_event(&self, event: &str) -> bool {
        let needle = format!("\"event\":\"{event}\"");
        self.lines().iter().any(|line| line.contains(&needle))
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}
