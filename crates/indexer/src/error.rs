use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunker error: {0}")]
    Chunker(#[from] silo_chunker::ChunkerError),

    #[error("embedding error: {0}")]
    Embedding(#[from] silo_embedding::EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] silo_store::StoreError),

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("watcher error: {0}")]
    Watch(String),

    #[error("{0}")]
    Other(String),
}
