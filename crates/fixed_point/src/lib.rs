//! framenet Fixed-Point Codec
//!
//! Converts f32 weights into saturated, rounded integers under a declared
//! clip range and quantization scale, element-wise over tensors of rank 0-2.

mod error;
mod fixed;
mod tensor;

pub use error::{FixedPointError, Result};
pub use fixed::{shared_scale, Convention, IntWidth, Quantizer, RoundingMode, DEFAULT_QUANT_SCALE};
pub use tensor::{QuantizedTensor, Tensor, MAX_RANK};
