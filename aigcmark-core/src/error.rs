use thiserror::Error;

/// Maximum side length of a payload matrix.
pub const MAX_MATRIX_SIZE: u32 = 32;

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Wavelet transform error: {0}")]
    TransformError(String),

    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Worker task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for WatermarkError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WatermarkError>;
