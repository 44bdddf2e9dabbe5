use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("Checkpoint writer has shut down")]
    WriterClosed,
}

pub type StoreResult<T> = Result<T, StoreError>;
