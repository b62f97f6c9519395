//! Error types for veritas-core.

use thiserror::Error;

/// Error type for data-contract operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A batch with no graphs.
    #[error("empty batch: {0}")]
    EmptyBatch(String),

    /// Class id outside the configured label set.
    #[error("class id {class} out of range (num classes: {num_classes})")]
    ClassOutOfRange { class: i64, num_classes: usize },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
