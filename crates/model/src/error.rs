//! Model error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Safetensors error: {0}")]
    Safetensors(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Shape mismatch for {name}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Non-finite parameter in {name} at index {index}: {value}")]
    NonFiniteParameter { name: String, index: usize, value: f32 },

    #[error("Invalid tensor dtype for {name}: expected f32, f16 or bf16, got {got}")]
    UnsupportedDtype { name: String, got: String },

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] framenet_fixed_point::FixedPointError),

    #[error("Model config error: {0}")]
    Config(String),

    #[error("Invalid model layout: {0}")]
    Layout(String),

    #[error("Embedding query is not finite: {0}")]
    NonFiniteQuery(f32),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Batch source already released")]
    Released,
}

pub type Result<T> = std::result::Result<T, ModelError>;
