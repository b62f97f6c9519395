//! Error types for veritas-nn.

use thiserror::Error;

/// Error type for the meta-learning core.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Data-contract error from veritas-core.
    #[error("data error: {0}")]
    Data(#[from] veritas_core::Error),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A class expected by the task has no support example, which would
    /// yield a NaN prototype.
    #[error("class {class} has no support example")]
    MissingClass { class: i64 },

    /// The loss of a task came out NaN or infinite.
    #[error("non-finite loss in task {task}")]
    NonFiniteLoss { task: usize },

    /// Variance statistics need at least two evaluation rounds.
    #[error("few-shot evaluation needs at least 2 test batches, got {got}")]
    InsufficientRounds { got: usize },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
