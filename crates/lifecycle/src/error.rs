use thiserror::Error;

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("illegal transition from {from:?} on {event}")]
    IllegalTransition { from: vault_protocol::FolderStatus, event: &'static str },

    #[error(transparent)]
    Store(#[from] vault_store::StoreError),

    #[error(transparent)]
    Read(#[from] vault_protocol::ReadError),

    #[error(transparent)]
    Embed(#[from] vault_protocol::EmbedError),

    #[error("backend probe failed: {0}")]
    ProbeFailed(#[from] vault_protocol::ProbeError),

    #[error("files were processed but no embeddings were created")]
    NoEmbeddingsProduced,

    #[error("{0}")]
    Other(String),
}

impl LifecycleError {
    /// A short, user-facing remediation class.
    pub fn remediation_class(&self) -> &'static str {
        match self {
            LifecycleError::ProbeFailed(_) => "backend unavailable",
            LifecycleError::NoEmbeddingsProduced => "no embeddings produced",
            LifecycleError::Embed(e) if e.is_permanent() => "backend unavailable",
            LifecycleError::Store(_) => "database error",
            LifecycleError::IllegalTransition { .. } => "internal error",
            _ => "unknown",
        }
    }
}
