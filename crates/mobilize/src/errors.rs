//! # Error Types

use std::path::PathBuf;

/// Errors from mobilize operations.
#[derive(Debug, thiserror::Error)]
pub enum MobilizeError {
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error from the `tokenizers` crate.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Error from the `safetensors` crate.
    #[error("safetensors error: {0}")]
    Safetensors(String),

    /// A required checkpoint file does not exist.
    #[error("missing file: {}", path.display())]
    MissingFile {
        /// The path that was expected.
        path: PathBuf,
    },

    /// A token id does not fit the model's vocabulary.
    #[error("token {token} out of range for vocab size {vocab_size}")]
    TokenOutOfRange {
        /// The offending token.
        token: u32,
        /// The model vocabulary size.
        vocab_size: usize,
    },

    /// Tensor or matrix shapes disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The requested converter optimization is not implemented.
    #[error("unsupported quantization: {0}")]
    UnsupportedQuantization(String),

    /// A model flatbuffer failed to parse.
    #[error("malformed model: {0}")]
    MalformedModel(String),

    /// Options are inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<tokenizers::Error> for MobilizeError {
    fn from(err: tokenizers::Error) -> Self {
        MobilizeError::Tokenizer(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for MobilizeError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        MobilizeError::Safetensors(err.to_string())
    }
}

/// Result type for mobilize operations.
pub type MZResult<T> = core::result::Result<T, MobilizeError>;
