use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("I/O failure while {context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Corrupt bundle: {0}")]
    Corrupt(String),

    #[error("Embedding model call failed: {0}")]
    EmbeddingFailure(#[source] BoxError),
}

impl RetrievalError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RetrievalError::IoFailure {
            context: context.into(),
            source,
        }
    }

    /// Valid input that produced nothing usable. Callers may report these
    /// instead of treating them as crashes.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            RetrievalError::EmptyInput(_) | RetrievalError::EmptyResult(_)
        )
    }
}
