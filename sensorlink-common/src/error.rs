use thiserror::Error;

/// Common error type for SensorLink components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid topic: {0}")]
    Topic(String),
}

/// Result type alias using SensorLink's Error.
pub type Result<T> = std::result::Result<T, Error>;
