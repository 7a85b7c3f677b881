use thiserror::Error;

/// Failure taxonomy. Kinds are attached to `anyhow` chains at the point of
/// failure and downcast where containment is decided: per-file kinds skip the
/// file, `NoOverlap` poisons a single conversation, the rest abort the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unparseable transcript: {0}")]
    ParseError(String),
    #[error("sequences from the same conversation do not overlap")]
    NoOverlap,
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("remote call failed: {0}")]
    RemoteFailure(String),
}

impl IngestError {
    /// The kind carried by an error chain, if any.
    pub fn of(e: &anyhow::Error) -> Option<&IngestError> {
        e.downcast_ref::<IngestError>()
    }
}
