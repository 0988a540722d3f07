use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("indexer error: {0}")]
    Indexer(#[from] silo_indexer::IndexerError),

    #[error("store error: {0}")]
    Store(#[from] silo_store::StoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] silo_embedding::EmbeddingError),

    #[error("no silo named `{0}`")]
    UnknownSilo(String),

    #[error("silo `{0}` already exists")]
    SiloExists(String),

    #[error("invalid silo config: {0}")]
    InvalidConfig(String),

    #[error("silo `{0}` is stopped")]
    SiloStopped(String),
}
