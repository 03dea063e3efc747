//! Export configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use framenet_fixed_point::{shared_scale, Convention, IntWidth, Quantizer, RoundingMode, DEFAULT_QUANT_SCALE};
use framenet_model::ClipRange;

use crate::error::{ExportError, Result};

/// How weights and biases map onto integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConventionKind {
    /// `round(v / clip * scale)`, saturated; biases use their own clip/scale
    #[default]
    ClipThenScale,
    /// `round(v * floor(127 / range))`; biases carry the combined
    /// input x weight scale as i32
    SharedScale,
}

impl ConventionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConventionKind::ClipThenScale => "clip-then-scale",
            ConventionKind::SharedScale => "shared-scale",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        [ConventionKind::ClipThenScale, ConventionKind::SharedScale]
            .into_iter()
            .find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for ConventionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_rounding(s: &str) -> Option<RoundingMode> {
    [RoundingMode::HalfToEven, RoundingMode::HalfAwayFromZero]
        .into_iter()
        .find(|m| m.as_str() == s)
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Quantization convention
    #[serde(default)]
    pub convention: ConventionKind,

    /// Clip range of embedding tables and linear weights
    #[serde(default = "default_clip")]
    pub weight_clip: f32,

    /// Integer scale of weights (clip-then-scale only)
    #[serde(default = "default_scale")]
    pub weight_scale: i32,

    /// Clip range of linear biases
    #[serde(default = "default_clip")]
    pub bias_clip: f32,

    /// Integer scale of biases (clip-then-scale only)
    #[serde(default = "default_scale")]
    pub bias_scale: i32,

    /// Range of layer inputs and hidden activations
    #[serde(default = "default_clip")]
    pub input_range: f32,

    /// Tie-breaking rule
    #[serde(default)]
    pub rounding: RoundingMode,

    /// Symbol names of the embedding tables, in order
    #[serde(default)]
    pub embedding_names: Option<Vec<String>>,

    /// Symbol names of the linear layers, in order
    #[serde(default)]
    pub linear_names: Option<Vec<String>>,
}

fn default_clip() -> f32 { 1.0 }
fn default_scale() -> i32 { DEFAULT_QUANT_SCALE }

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            convention: ConventionKind::default(),
            weight_clip: default_clip(),
            weight_scale: default_scale(),
            bias_clip: default_clip(),
            bias_scale: default_scale(),
            input_range: default_clip(),
            rounding: RoundingMode::default(),
            embedding_names: None,
            linear_names: None,
        }
    }
}

impl ExportConfig {
    /// Load config from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `FRAMENET_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(c) = lookup("FRAMENET_CONVENTION").and_then(|v| ConventionKind::parse(&v)) {
            self.convention = c;
        }

        if let Some(r) = lookup("FRAMENET_ROUNDING").and_then(|v| parse_rounding(&v)) {
            self.rounding = r;
        }

        if let Some(v) = lookup("FRAMENET_WEIGHT_CLIP") {
            if let Ok(v) = v.parse() {
                self.weight_clip = v;
            }
        }

        if let Some(v) = lookup("FRAMENET_WEIGHT_SCALE") {
            if let Ok(v) = v.parse() {
                self.weight_scale = v;
            }
        }

        if let Some(v) = lookup("FRAMENET_BIAS_CLIP") {
            if let Ok(v) = v.parse() {
                self.bias_clip = v;
            }
        }

        if let Some(v) = lookup("FRAMENET_BIAS_SCALE") {
            if let Ok(v) = v.parse() {
                self.bias_scale = v;
            }
        }

        if let Some(v) = lookup("FRAMENET_INPUT_RANGE") {
            if let Ok(v) = v.parse() {
                self.input_range = v;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("weight_clip", self.weight_clip),
            ("bias_clip", self.bias_clip),
            ("input_range", self.input_range),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(ExportError::Config(format!("{} must be finite and > 0, got {}", name, v)));
            }
        }
        for (name, v) in [("weight_scale", self.weight_scale), ("bias_scale", self.bias_scale)] {
            if !(1..=DEFAULT_QUANT_SCALE).contains(&v) {
                return Err(ExportError::Config(format!(
                    "{} must be in 1..={}, got {}",
                    name, DEFAULT_QUANT_SCALE, v
                )));
            }
        }

        let names = self.embedding_names.iter().chain(&self.linear_names).flatten();
        let mut seen = std::collections::HashSet::new();
        for name in names {
            if !is_identifier(name) {
                return Err(ExportError::Config(format!("{:?} is not a valid symbol name", name)));
            }
            if !seen.insert(name) {
                return Err(ExportError::Config(format!("symbol name {} used twice", name)));
            }
        }

        // Catches ranges so small that the combined scale leaves i32
        self.bias_quantizer()?;
        Ok(())
    }

    /// Clip bounds applied to the model before quantization
    ///
    /// Shared-scale biases are i32 at the combined scale and are never
    /// clipped.
    pub fn clip_range(&self) -> Result<ClipRange> {
        let clip = match self.convention {
            ConventionKind::ClipThenScale => ClipRange::new(self.weight_clip, self.bias_clip)?,
            ConventionKind::SharedScale => ClipRange::weights_only(self.weight_clip)?,
        };
        Ok(clip)
    }

    /// Quantizer for embedding tables and linear weights
    pub fn weight_quantizer(&self) -> Result<Quantizer> {
        let convention = match self.convention {
            ConventionKind::ClipThenScale => Convention::ClipThenScale {
                clip_range: self.weight_clip,
                scale: self.weight_scale,
            },
            ConventionKind::SharedScale => Convention::ScaleOnly {
                scale: shared_scale(self.weight_clip)?,
            },
        };
        Ok(Quantizer::new(convention, IntWidth::I8, self.rounding)?)
    }

    /// Quantizer for linear biases
    pub fn bias_quantizer(&self) -> Result<Quantizer> {
        let q = match self.convention {
            ConventionKind::ClipThenScale => Quantizer::new(
                Convention::ClipThenScale {
                    clip_range: self.bias_clip,
                    scale: self.bias_scale,
                },
                IntWidth::I8,
                self.rounding,
            )?,
            ConventionKind::SharedScale => {
                let scale = shared_scale(self.input_range)?
                    .checked_mul(shared_scale(self.weight_clip)?)
                    .ok_or_else(|| {
                        ExportError::Config(format!(
                            "combined scale of input_range {} and weight_clip {} overflows i32",
                            self.input_range, self.weight_clip
                        ))
                    })?;
                Quantizer::new(Convention::ScaleOnly { scale }, IntWidth::I32, self.rounding)?
            }
        };
        Ok(q)
    }

    /// Multiplier from real layer inputs to the integer input domain
    ///
    /// Under clip-then-scale the runtime reuses the weight factor
    /// `WEIGHT_QUANT_RANGE / WEIGHT_CLIP_RANGE` for inputs.
    pub fn input_scale(&self) -> Result<f64> {
        match self.convention {
            ConventionKind::ClipThenScale => Ok(self.weight_scale as f64 / self.weight_clip as f64),
            ConventionKind::SharedScale => Ok(shared_scale(self.input_range)? as f64),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        config.validate().unwrap();
        assert_eq!(config.convention, ConventionKind::ClipThenScale);
        assert_eq!(config.rounding, RoundingMode::HalfToEven);
        assert_eq!(config.weight_quantizer().unwrap().quantize(0.5).unwrap(), 64);
        assert_eq!(config.input_scale().unwrap(), 127.0);
    }

    #[test]
    fn test_json_defaults() {
        let config: ExportConfig =
            serde_json::from_str(r#"{ "convention": "shared-scale", "input_range": 0.5 }"#).unwrap();
        assert_eq!(config.convention, ConventionKind::SharedScale);
        assert_eq!(config.weight_clip, 1.0);

        let bias = config.bias_quantizer().unwrap();
        assert_eq!(bias.scale(), 254 * 127);
        assert_eq!(bias.width(), IntWidth::I32);
        assert_eq!(config.input_scale().unwrap(), 254.0);
    }

    #[test]
    fn test_clip_then_scale_input_scale_follows_weights() {
        let config = ExportConfig {
            weight_clip: 0.5,
            input_range: 2.0,
            ..Default::default()
        };
        assert_eq!(config.input_scale().unwrap(), 254.0);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("FRAMENET_CONVENTION", "shared-scale"),
            ("FRAMENET_ROUNDING", "half-away-from-zero"),
            ("FRAMENET_WEIGHT_CLIP", "0.5"),
            ("FRAMENET_BIAS_SCALE", "not a number"),
        ]
        .into_iter()
        .collect();

        let config = ExportConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.convention, ConventionKind::SharedScale);
        assert_eq!(config.rounding, RoundingMode::HalfAwayFromZero);
        assert_eq!(config.weight_clip, 0.5);
        assert_eq!(config.bias_scale, 127);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_clip = ExportConfig {
            weight_clip: 0.0,
            ..Default::default()
        };
        assert!(matches!(bad_clip.validate(), Err(ExportError::Config(_))));

        let bad_scale = ExportConfig {
            weight_scale: 300,
            ..Default::default()
        };
        assert!(bad_scale.validate().is_err());

        let bad_name = ExportConfig {
            linear_names: Some(vec!["L0".into(), "1X".into(), "L2".into()]),
            ..Default::default()
        };
        assert!(bad_name.validate().is_err());

        let duplicate = ExportConfig {
            embedding_names: Some(vec!["A".into()]),
            linear_names: Some(vec!["A".into()]),
            ..Default::default()
        };
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(&path, r#"{ "rounding": "half-away-from-zero", "bias_clip": 2.0 }"#).unwrap();

        let config = ExportConfig::from_json_file(&path).unwrap();
        assert_eq!(config.rounding, RoundingMode::HalfAwayFromZero);
        assert_eq!(config.bias_clip, 2.0);
        assert_eq!(config.clip_range().unwrap(), ClipRange::new(1.0, 2.0).unwrap());
    }

    #[test]
    fn test_shared_scale_clips_weights_only() {
        let config = ExportConfig {
            convention: ConventionKind::SharedScale,
            weight_clip: 0.5,
            ..Default::default()
        };
        assert_eq!(config.clip_range().unwrap(), ClipRange::weights_only(0.5).unwrap());
        assert_eq!(config.clip_range().unwrap().bias, None);
    }
}
