use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store meta row missing; silo was never initialised")]
    MetaMissing,

    #[error("vector dimension {actual} does not match store dimensions {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk/vector count mismatch: {chunks} chunks, {vectors} vectors")]
    VectorCount { chunks: usize, vectors: usize },
}
