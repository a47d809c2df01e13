//! Error types for gate construction and routing.

use thiserror::Error;

/// Errors that can occur while building or running a gate.
#[derive(Error, Debug)]
pub enum GateError {
    /// Gate parameters are inconsistent or unsupported.
    #[error("invalid gate configuration: {0}")]
    InvalidConfiguration(String),

    /// Token batch or scorer output does not have the expected shape.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An expert id outside `[0, num_experts)` was encountered.
    #[error("expert {expert} out of range: num_experts = {num_experts}")]
    ExpertOutOfRange { expert: usize, num_experts: usize },

    /// Underlying tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl GateError {
    /// Whether this is a configuration error raised at construction time.
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
