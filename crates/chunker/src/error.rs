use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkerError>;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("no grammar for extension: {0}")]
    UnsupportedLanguage(String),

    #[error("parse failed: {0}")]
    Parse(String),
}
