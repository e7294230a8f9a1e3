//! Crate-wide error type.
//!
//! Operational failures callers can react to get their own variants;
//! storage-layer errors funnel through [`IndexError::Store`].

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    Extract(String),

    #[error("embedding has {got} dimensions, index expects {expected}")]
    EmbeddingDimension { got: usize, expected: usize },

    #[error("vector index is empty")]
    EmptyIndex,

    #[error("record already exists for {path}")]
    ConstraintViolation { path: String },

    #[error("summary did not converge within {rounds} rounds")]
    Convergence { rounds: usize },

    #[error("store and index out of step: {records} records vs {vectors} vectors")]
    IndexAlignment { records: u64, vectors: u64 },

    #[error("overlap {overlap} must be smaller than chunk size {chunk_size}")]
    InvalidOverlap { overlap: usize, chunk_size: usize },

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("generation request failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
