//! Error types for job execution.

use linkgate_core::LinkgateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("command {0} is empty")]
    EmptyCommand(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {name} timed out after {secs} seconds")]
    CommandTimeout { name: String, secs: u64 },

    #[error("server launch failed: {0}")]
    Launch(String),

    #[error("readiness HTTP client could not be built: {0}")]
    ReadinessClient(String),

    #[error("server at {addr} not ready after {waited_ms}ms")]
    NotReady { addr: String, waited_ms: u64 },

    #[error("verifier download failed: {0}")]
    VerifierDownload(String),

    #[error("verifier archive digest mismatch: expected {expected}, got {actual}")]
    VerifierIntegrity { expected: String, actual: String },

    #[error("verifier extraction failed: {0}")]
    VerifierExtract(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Domain(#[from] LinkgateError),
}

impl From<reqwest::Error> for CiError {
    fn from(err: reqwest::Error) -> Self {
        CiError::VerifierDownload(err.to_string())
    }
}

/// Result type for job execution.
pub type Result<T> = std::result::Result<T, CiError>;
