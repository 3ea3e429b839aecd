//! Domain-level error taxonomy for linkgate.

/// linkgate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkgateError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid trigger event: {0}")]
    InvalidEvent(String),

    #[error("invalid job state transition: {current} -> {requested}")]
    InvalidTransition { current: String, requested: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for linkgate domain operations.
pub type Result<T> = std::result::Result<T, LinkgateError>;
