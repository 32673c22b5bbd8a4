//! Error kinds realized as typed enums rather than string-matched
//! messages, so model-load failure detection does not depend on
//! matching a backend's error text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("path not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// Embedding failures split into transient (retryable) and permanent
/// (fail-fast) kinds.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding backend timed out or rate-limited: {0}")]
    Transient(String),
    #[error("embedding backend unavailable: {0}")]
    Permanent(String),
}

impl EmbedError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, EmbedError::Permanent(_))
    }
}

/// Result of `Embedder::probe()`. `Unavailable` is transient (backend
/// temporarily unreachable); the other two are permanent
/// mis-configuration and should fail the folder outright.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("embedding backend temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("embedding model missing: {0}")]
    ModelMissing(String),
    #[error("embedding runtime absent: {0}")]
    RuntimeAbsent(String),
}

impl ProbeError {
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ProbeError::Unavailable(_))
    }
}
