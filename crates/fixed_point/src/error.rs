//! Fixed-point error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixedPointError {
    #[error("Non-finite value cannot be quantized: {value}")]
    NonFinite { value: f32 },

    #[error("Overflow during fixed-point conversion: value {value} scales past ±{limit}")]
    Overflow { value: f64, limit: i64 },

    #[error("Invalid clip range: {0} (must be finite and > 0)")]
    InvalidClipRange(f32),

    #[error("Invalid quantization scale: {scale} (must be 1..={limit})")]
    InvalidScale { scale: i64, limit: i64 },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Unsupported tensor rank: {0} (must be 0, 1 or 2)")]
    InvalidRank(usize),
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
