//! Layer weight structures

use framenet_fixed_point::Tensor;
use rand::Rng;

use crate::embedding::EmbeddingTable;
use crate::error::{ModelError, Result};

/// Symmetric clip bounds applied to a model before export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRange {
    /// Bound for embedding tables and linear weights
    pub weight: f32,
    /// Bound for linear biases; `None` leaves biases unclipped
    pub bias: Option<f32>,
}

impl ClipRange {
    pub fn new(weight: f32, bias: f32) -> Result<Self> {
        check_bound("bias", bias)?;
        Ok(Self {
            bias: Some(bias),
            ..Self::weights_only(weight)?
        })
    }

    /// Clip embeddings and linear weights only
    pub fn weights_only(weight: f32) -> Result<Self> {
        check_bound("weight", weight)?;
        Ok(Self { weight, bias: None })
    }
}

fn check_bound(name: &str, v: f32) -> Result<()> {
    if !v.is_finite() || v <= 0.0 {
        return Err(ModelError::Config(format!(
            "{} clip range must be finite and > 0, got {}",
            name, v
        )));
    }
    Ok(())
}

/// Weights for a linear layer (y = Wx + b)
#[derive(Debug, Clone, PartialEq)]
pub struct LinearWeights {
    /// Weight matrix `[out_features, in_features]`
    weight: Tensor,
    /// Bias vector `[out_features]`, if the layer has one
    bias: Option<Tensor>,
}

impl LinearWeights {
    /// Create from a weight matrix and optional bias, checking shapes
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(ModelError::Layout(format!(
                "linear weight must be rank 2, got shape {:?}",
                weight.shape()
            )));
        }
        if let Some(b) = &bias {
            if b.shape() != [weight.shape()[0]] {
                return Err(ModelError::ShapeMismatch {
                    name: "bias".to_string(),
                    expected: vec![weight.shape()[0]],
                    got: b.shape().to_vec(),
                });
            }
        }
        Ok(Self { weight, bias })
    }

    /// Create a random linear layer (for testing)
    ///
    /// Uniform in `±1/sqrt(in_features)`, matching the usual default init.
    pub fn random<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Result<Self> {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let weight = (0..in_features * out_features)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let bias = (0..out_features).map(|_| rng.gen_range(-bound..bound)).collect();
        Self::new(
            Tensor::matrix(out_features, in_features, weight)?,
            Some(Tensor::vector(bias)),
        )
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Compute `Wx + b`
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        let cols = self.in_features();
        let w = self.weight.data();
        (0..self.out_features())
            .map(|o| {
                let row = &w[o * cols..(o + 1) * cols];
                let dot: f32 = row.iter().zip(input).map(|(w, x)| w * x).sum();
                dot + self.bias.as_ref().map_or(0.0, |b| b.data()[o])
            })
            .collect()
    }

    fn clipped(&self, clip: ClipRange) -> Self {
        Self {
            weight: self.weight.clamp(clip.weight),
            bias: match clip.bias {
                Some(limit) => self.bias.as_ref().map(|b| b.clamp(limit)),
                None => self.bias.clone(),
            },
        }
    }
}

/// A model layer
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Embedding(EmbeddingTable),
    Linear(LinearWeights),
}

impl Layer {
    /// Number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::Embedding(t) => t.weight().len(),
            Layer::Linear(l) => l.weight().len() + l.bias().map_or(0, Tensor::len),
        }
    }

    /// Copy with every tensor clamped to its clip bound
    pub fn clipped(&self, clip: ClipRange) -> Self {
        match self {
            Layer::Embedding(t) => Layer::Embedding(t.with_weight(t.weight().clamp(clip.weight))),
            Layer::Linear(l) => Layer::Linear(l.clipped(clip)),
        }
    }

    /// Number of values the clip would change
    pub fn count_clipped(&self, clip: ClipRange) -> usize {
        match self {
            Layer::Embedding(t) => t.weight().count_outside(clip.weight),
            Layer::Linear(l) => {
                l.weight().count_outside(clip.weight)
                    + l.bias()
                        .zip(clip.bias)
                        .map_or(0, |(b, limit)| b.count_outside(limit))
            }
        }
    }

    /// Named tensors of this layer, `"weight"` first
    pub fn tensors(&self) -> Vec<(&'static str, &Tensor)> {
        match self {
            Layer::Embedding(t) => vec![("weight", t.weight())],
            Layer::Linear(l) => {
                let mut out = vec![("weight", l.weight())];
                if let Some(b) = l.bias() {
                    out.push(("bias", b));
                }
                out
            }
        }
    }
}

/// A layer with the name it carries in the source snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct NamedLayer {
    pub name: String,
    pub layer: Layer,
}

impl NamedLayer {
    pub fn new(name: impl Into<String>, layer: Layer) -> Self {
        Self {
            name: name.into(),
            layer,
        }
    }
}
