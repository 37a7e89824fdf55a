#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode record `{id}`: {reason}")]
    Encode { id: String, reason: String },
    #[error("failed to decode record {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("invalid store name: {0}")]
    InvalidName(String),
    #[error("failed to generate record id: {0}")]
    IdGeneration(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create vault path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("recovery failed: {0}")]
    Recovery(String),
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
