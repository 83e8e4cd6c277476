use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid document uri: {0}")]
    InvalidUri(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
