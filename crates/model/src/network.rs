//! Coordinate network: embedding lookup followed by dense layers
//!
//! Layout invariants, checked on construction:
//! - one or more embedding tables, then one or more linear layers
//! - the first linear layer consumes `point_dims + Σ embedding_dim`
//! - every later linear layer consumes its predecessor's output

use framenet_fixed_point::Tensor;
use rand::Rng;

use crate::config::ArchitectureConfig;
use crate::embedding::{lookup_all, EmbeddingQuery, EmbeddingTable};
use crate::error::{ModelError, Result};
use crate::native::{Batch, EmbeddingBatch, FeatureSource};
use crate::weights::{ClipRange, Layer, LinearWeights, NamedLayer};

/// Logistic sigmoid
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// An immutable model snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    layers: Vec<NamedLayer>,
    point_dims: usize,
}

impl Model {
    /// Create from ordered layers, checking the layout invariants
    pub fn new(layers: Vec<NamedLayer>) -> Result<Self> {
        let split = layers
            .iter()
            .position(|l| matches!(l.layer, Layer::Linear(_)))
            .unwrap_or(layers.len());

        if split == 0 {
            return Err(ModelError::Layout("model needs at least one embedding table".to_string()));
        }
        if split == layers.len() {
            return Err(ModelError::Layout("model needs at least one linear layer".to_string()));
        }
        if let Some(l) = layers[split..]
            .iter()
            .find(|l| matches!(l.layer, Layer::Embedding(_)))
        {
            return Err(ModelError::Layout(format!(
                "embedding {} follows a linear layer",
                l.name
            )));
        }

        let embedding_width: usize = layers[..split]
            .iter()
            .filter_map(|l| match &l.layer {
                Layer::Embedding(t) => Some(t.embedding_dim()),
                Layer::Linear(_) => None,
            })
            .sum();

        let linears: Vec<(&str, &LinearWeights)> = layers[split..]
            .iter()
            .filter_map(|l| match &l.layer {
                Layer::Linear(w) => Some((l.name.as_str(), w)),
                Layer::Embedding(_) => None,
            })
            .collect();

        let (first_name, first) = linears[0];
        if first.in_features() <= embedding_width {
            return Err(ModelError::ShapeMismatch {
                name: first_name.to_string(),
                expected: vec![first.out_features(), embedding_width + 1],
                got: first.weight().shape().to_vec(),
            });
        }
        let point_dims = first.in_features() - embedding_width;

        for pair in linears.windows(2) {
            let (_, prev) = pair[0];
            let (name, next) = pair[1];
            if next.in_features() != prev.out_features() {
                return Err(ModelError::ShapeMismatch {
                    name: name.to_string(),
                    expected: vec![next.out_features(), prev.out_features()],
                    got: next.weight().shape().to_vec(),
                });
            }
        }

        Ok(Self { layers, point_dims })
    }

    /// Build a randomly initialised model (for testing and smoke runs)
    ///
    /// Shapes come from `config` resolved against `features`.
    pub fn random<R: Rng>(
        config: &ArchitectureConfig,
        features: &dyn FeatureSource,
        rng: &mut R,
    ) -> Result<Self> {
        let shapes = config.resolve(features)?;
        let mut layers = Vec::with_capacity(shapes.embeddings.len() + shapes.linears.len());

        for (i, &(rows, dim, ratio)) in shapes.embeddings.iter().enumerate() {
            let table = EmbeddingTable::random(rows, dim, ratio, rng)?;
            layers.push(NamedLayer::new(config.embedding_prefix(i), Layer::Embedding(table)));
        }
        for (i, &(in_features, out_features)) in shapes.linears.iter().enumerate() {
            let linear = LinearWeights::random(in_features, out_features, rng)?;
            layers.push(NamedLayer::new(config.linear_prefix(i), Layer::Linear(linear)));
        }

        Self::new(layers)
    }

    pub fn layers(&self) -> &[NamedLayer] {
        &self.layers
    }

    /// Width of the spatial point features, derived from the layer shapes
    pub fn point_dims(&self) -> usize {
        self.point_dims
    }

    /// Embedding tables in declaration order
    pub fn embeddings(&self) -> impl Iterator<Item = &EmbeddingTable> {
        self.layers.iter().filter_map(|l| match &l.layer {
            Layer::Embedding(t) => Some(t),
            Layer::Linear(_) => None,
        })
    }

    /// Linear layers in forward order
    pub fn linears(&self) -> impl Iterator<Item = &LinearWeights> {
        self.layers.iter().filter_map(|l| match &l.layer {
            Layer::Linear(w) => Some(w),
            Layer::Embedding(_) => None,
        })
    }

    pub fn embedding_width(&self) -> usize {
        self.embeddings().map(EmbeddingTable::embedding_dim).sum()
    }

    pub fn output_size(&self) -> usize {
        self.linears().last().map_or(0, LinearWeights::out_features)
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.layer.parameter_count()).sum()
    }

    /// Copy with every tensor clamped to `clip`
    pub fn clipped(&self, clip: ClipRange) -> Self {
        Self {
            layers: self
                .layers
                .iter()
                .map(|l| NamedLayer::new(l.name.clone(), l.layer.clipped(clip)))
                .collect(),
            point_dims: self.point_dims,
        }
    }

    /// Number of values `clipped` would change
    pub fn count_clipped(&self, clip: ClipRange) -> usize {
        self.layers.iter().map(|l| l.layer.count_clipped(clip)).sum()
    }

    /// Fail on the first NaN or infinite parameter
    pub fn check_finite(&self) -> Result<()> {
        for named in &self.layers {
            for (field, tensor) in named.layer.tensors() {
                if let Some((index, value)) = tensor.first_non_finite() {
                    return Err(ModelError::NonFiniteParameter {
                        name: format!("{}.{}", named.name, field),
                        index,
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    /// Concatenated embedding features for a query
    pub fn embed(&self, query: EmbeddingQuery) -> Result<Vec<f32>> {
        lookup_all(self.embeddings(), query)
    }

    /// Float forward pass for one sample.
    ///
    /// Hidden activations are clamped to `[0, input_range]`; the output
    /// layer goes through a sigmoid.
    pub fn forward(&self, point: &[f32], query: EmbeddingQuery, input_range: f32) -> Result<Vec<f32>> {
        if point.len() != self.point_dims {
            return Err(ModelError::ShapeMismatch {
                name: "point".to_string(),
                expected: vec![self.point_dims],
                got: vec![point.len()],
            });
        }
        if !(input_range.is_finite() && input_range > 0.0) {
            return Err(ModelError::Config(format!(
                "input_range must be finite and > 0, got {}",
                input_range
            )));
        }

        let mut x = Vec::with_capacity(self.point_dims + self.embedding_width());
        x.extend_from_slice(point);
        x.extend(self.embed(query)?);

        let count = self.linears().count();
        for (i, linear) in self.linears().enumerate() {
            let mut y = linear.forward(&x);
            if i + 1 < count {
                y.iter_mut().for_each(|v| *v = v.clamp(0.0, input_range));
            } else {
                y.iter_mut().for_each(|v| *v = sigmoid(*v));
            }
            x = y;
        }
        Ok(x)
    }

    /// Forward every sample of a batch
    pub fn forward_batch(&self, batch: &Batch, input_range: f32) -> Result<Vec<Vec<f32>>> {
        batch.validate()?;
        let queries = batch.embeddings.as_ref().ok_or_else(|| {
            ModelError::InvalidBatch("model has embeddings but the batch has no inputs".to_string())
        })?;

        (0..batch.batch_size())
            .map(|i| {
                let query = match queries {
                    EmbeddingBatch::Queries(q) => EmbeddingQuery::Index(q[i]),
                    EmbeddingBatch::Indices(idx) => EmbeddingQuery::Index(idx[i] as f32),
                };
                self.forward(batch.point(i), query, input_range)
            })
            .collect()
    }

    /// Copy with one named tensor replaced, re-checking the layout
    pub fn with_tensor(&self, layer: &str, field: &str, tensor: Tensor) -> Result<Self> {
        let mut layers = self.layers.clone();
        let named = layers
            .iter_mut()
            .find(|l| l.name == layer)
            .ok_or_else(|| ModelError::MissingTensor(format!("{}.{}", layer, field)))?;

        named.layer = match (&named.layer, field) {
            (Layer::Embedding(t), "weight") => Layer::Embedding(EmbeddingTable::new(tensor, t.resolution_ratio())?),
            (Layer::Linear(l), "weight") => Layer::Linear(LinearWeights::new(tensor, l.bias().cloned())?),
            (Layer::Linear(l), "bias") => Layer::Linear(LinearWeights::new(l.weight().clone(), Some(tensor))?),
            _ => return Err(ModelError::MissingTensor(format!("{}.{}", layer, field))),
        };
        Self::new(layers)
    }
}
