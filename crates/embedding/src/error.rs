use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("invalid embedding configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unknown model id: {0}")]
    UnknownModel(String),

    #[error("model files missing for `{model_id}`: {detail}")]
    ModelUnavailable { model_id: String, detail: String },

    #[error("tokenizer failure: {0}")]
    Tokenizer(String),

    #[error("inference failure: {0}")]
    Runtime(String),
}
