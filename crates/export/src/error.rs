//! Export error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Non-finite parameter in {layer}.{field} at index {index}: {value}")]
    NonFiniteParameter {
        layer: String,
        field: String,
        index: usize,
        value: f32,
    },

    #[error("Shape mismatch for {layer}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        layer: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Export config error: {0}")]
    Config(String),

    #[error("Model error: {0}")]
    Model(#[from] framenet_model::ModelError),

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] framenet_fixed_point::FixedPointError),
}

pub type Result<T> = std::result::Result<T, ExportError>;
