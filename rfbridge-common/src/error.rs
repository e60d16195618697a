use thiserror::Error;

/// Common error type for rfbridge components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("External process error: {0}")]
    Process(String),
}

/// Result type alias using rfbridge's Error.
pub type Result<T> = std::result::Result<T, Error>;
