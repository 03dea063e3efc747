//! Scalar fixed-point codec
//!
//! Maps a 32-bit float onto a bounded signed integer under one of two
//! conventions:
//!
//! - `ClipThenScale`: `n = round(v / clip_range * scale)`, saturated to
//!   `[-scale, scale]`.
//! - `ScaleOnly`: `n = round(v * scale)`. The scale already encodes the clip
//!   boundary, so a result outside the integer width is an error rather than
//!   a silent clamp.
//!
//! Scaling is done in f64 from the f32 input so exact `.5` ties survive and
//! the rounding mode decides them.

use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};

/// Symmetric 8-bit quantization boundary
pub const DEFAULT_QUANT_SCALE: i32 = 127;

/// Rounding rule applied after scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingMode {
    /// Ties go to the even neighbour (63.5 -> 64, 12.5 -> 12)
    #[default]
    HalfToEven,
    /// Ties go away from zero (12.5 -> 13, -12.5 -> -13)
    HalfAwayFromZero,
}

impl RoundingMode {
    /// Round a scaled value
    pub fn round(self, value: f64) -> f64 {
        match self {
            RoundingMode::HalfToEven => value.round_ties_even(),
            RoundingMode::HalfAwayFromZero => value.round(),
        }
    }

    /// Stable name, written into emitted artifacts
    pub fn as_str(self) -> &'static str {
        match self {
            RoundingMode::HalfToEven => "half-to-even",
            RoundingMode::HalfAwayFromZero => "half-away-from-zero",
        }
    }
}

impl std::fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer width of a quantized value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntWidth {
    /// Symmetric signed 8-bit, `[-127, 127]`
    I8,
    /// Signed 32-bit
    I32,
}

impl IntWidth {
    /// Largest magnitude a value of this width may take
    pub fn limit(self) -> i64 {
        match self {
            IntWidth::I8 => DEFAULT_QUANT_SCALE as i64,
            IntWidth::I32 => i32::MAX as i64,
        }
    }

    /// Rust primitive name, used as the literal suffix in emitted code
    pub fn rust_type(self) -> &'static str {
        match self {
            IntWidth::I8 => "i8",
            IntWidth::I32 => "i32",
        }
    }
}

/// Quantization convention
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convention {
    /// Divide by the clip range, multiply by the scale, saturate
    ClipThenScale { clip_range: f32, scale: i32 },
    /// Multiply by the scale only; the scale implies the clip boundary
    ScaleOnly { scale: i32 },
}

/// Derive the shared scale `floor(127 / range)` used by scale-only models
pub fn shared_scale(range: f32) -> Result<i32> {
    if !range.is_finite() || range <= 0.0 {
        return Err(FixedPointError::InvalidClipRange(range));
    }
    let scale = (DEFAULT_QUANT_SCALE as f64 / range as f64).floor();
    if scale < 1.0 {
        return Err(FixedPointError::InvalidScale {
            scale: scale as i64,
            limit: DEFAULT_QUANT_SCALE as i64,
        });
    }
    Ok(scale as i32)
}

/// A configured scalar quantizer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    convention: Convention,
    width: IntWidth,
    rounding: RoundingMode,
}

impl Quantizer {
    /// Create a quantizer, validating the convention against the width
    pub fn new(convention: Convention, width: IntWidth, rounding: RoundingMode) -> Result<Self> {
        // Saturation bounds a clip-then-scale result by its scale, so the
        // scale itself must fit the width. Scale-only results are checked
        // per value instead.
        let (scale, limit) = match convention {
            Convention::ClipThenScale { clip_range, scale } => {
                if !clip_range.is_finite() || clip_range <= 0.0 {
                    return Err(FixedPointError::InvalidClipRange(clip_range));
                }
                (scale, width.limit())
            }
            Convention::ScaleOnly { scale } => (scale, i32::MAX as i64),
        };
        if scale < 1 || scale as i64 > limit {
            return Err(FixedPointError::InvalidScale {
                scale: scale as i64,
                limit,
            });
        }
        Ok(Self {
            convention,
            width,
            rounding,
        })
    }

    /// 8-bit clip-then-scale quantizer with the default rounding mode
    pub fn clip_then_scale(clip_range: f32, scale: i32) -> Result<Self> {
        Self::new(
            Convention::ClipThenScale { clip_range, scale },
            IntWidth::I8,
            RoundingMode::default(),
        )
    }

    /// Scale-only quantizer of the given width with the default rounding mode
    pub fn scale_only(scale: i32, width: IntWidth) -> Result<Self> {
        Self::new(Convention::ScaleOnly { scale }, width, RoundingMode::default())
    }

    /// Replace the rounding mode
    pub fn with_rounding(self, rounding: RoundingMode) -> Self {
        Self { rounding, ..self }
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    pub fn width(&self) -> IntWidth {
        self.width
    }

    pub fn rounding(&self) -> RoundingMode {
        self.rounding
    }

    /// Integer scale of the convention
    pub fn scale(&self) -> i32 {
        match self.convention {
            Convention::ClipThenScale { scale, .. } | Convention::ScaleOnly { scale } => scale,
        }
    }

    /// Multiplier from real value to integer domain
    pub fn factor(&self) -> f64 {
        match self.convention {
            Convention::ClipThenScale { clip_range, scale } => scale as f64 / clip_range as f64,
            Convention::ScaleOnly { scale } => scale as f64,
        }
    }

    /// Size of one quantization step in real units
    pub fn step(&self) -> f32 {
        (1.0 / self.factor()) as f32
    }

    /// Quantize a single finite value
    pub fn quantize(&self, value: f32) -> Result<i32> {
        if !value.is_finite() {
            return Err(FixedPointError::NonFinite { value });
        }

        match self.convention {
            Convention::ClipThenScale { clip_range, scale } => {
                let scaled = value as f64 / clip_range as f64 * scale as f64;
                let bound = scale as f64;
                Ok(self.rounding.round(scaled).clamp(-bound, bound) as i32)
            }
            Convention::ScaleOnly { scale } => {
                let n = self.rounding.round(value as f64 * scale as f64);
                let limit = self.width.limit();
                if n.abs() > limit as f64 {
                    return Err(FixedPointError::Overflow { value: n, limit });
                }
                Ok(n as i32)
            }
        }
    }

    /// Map an integer back to its real value
    pub fn dequantize(&self, raw: i32) -> f32 {
        (raw as f64 / self.factor()) as f32
    }
}
