//! Network architecture configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ModelError, Result};
use crate::native::FeatureSource;

/// One embedding table of the architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Width of each table row
    pub embedding_dim: usize,

    /// Table holds one row per `resolution_ratio` full-resolution rows
    #[serde(default = "default_resolution_ratio")]
    pub resolution_ratio: u32,

    /// Tensor name prefix in the snapshot (defaults to `em` / `em{i}`)
    #[serde(default)]
    pub tensor_prefix: Option<String>,
}

fn default_resolution_ratio() -> u32 { 1 }

/// Architecture of the coordinate network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    /// Width of the spatial point feature vector
    #[serde(default = "default_point_dims")]
    pub point_dims: usize,

    /// Rows of the full-resolution embedding table
    #[serde(default = "default_embedding_count")]
    pub embedding_count: usize,

    /// Embedding tables, in concatenation order
    #[serde(default = "default_embeddings")]
    pub embeddings: Vec<EmbeddingConfig>,

    /// Output sizes of the hidden linear layers
    #[serde(default = "default_hidden_sizes")]
    pub hidden_sizes: Vec<usize>,

    /// Output size of the final linear layer
    #[serde(default = "default_output_size")]
    pub output_size: usize,

    /// Upper bound of hidden activations (they are clamped to `[0, input_range]`)
    #[serde(default = "default_input_range")]
    pub input_range: f32,

    /// Tensor name prefixes of the linear layers (defaults to `l{i}`)
    #[serde(default)]
    pub linear_prefixes: Option<Vec<String>>,
}

fn default_point_dims() -> usize { 56 }
fn default_embedding_count() -> usize { 820 }
fn default_embeddings() -> Vec<EmbeddingConfig> {
    vec![EmbeddingConfig {
        embedding_dim: 32,
        resolution_ratio: 1,
        tensor_prefix: None,
    }]
}
fn default_hidden_sizes() -> Vec<usize> { vec![128, 112] }
fn default_output_size() -> usize { 1 }
fn default_input_range() -> f32 { 1.0 }

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            point_dims: default_point_dims(),
            embedding_count: default_embedding_count(),
            embeddings: default_embeddings(),
            hidden_sizes: default_hidden_sizes(),
            output_size: default_output_size(),
            input_range: default_input_range(),
            linear_prefixes: None,
        }
    }
}

/// Concrete layer shapes derived from a config and a feature source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShapes {
    /// `(table_size, embedding_dim, resolution_ratio)` per table
    pub embeddings: Vec<(usize, usize, u32)>,
    /// `(in_features, out_features)` per linear layer
    pub linears: Vec<(usize, usize)>,
}

impl ArchitectureConfig {
    /// Load config from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write config as pretty JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.embeddings.is_empty() {
            return Err(ModelError::Config("at least one embedding table is required".to_string()));
        }
        if let Some(bad) = self.embeddings.iter().find(|e| e.embedding_dim == 0 || e.resolution_ratio == 0) {
            return Err(ModelError::Config(format!(
                "embedding dim and resolution ratio must be > 0, got {:?}",
                bad
            )));
        }
        if self.hidden_sizes.iter().any(|&h| h == 0) || self.output_size == 0 {
            return Err(ModelError::Config("linear layer sizes must be > 0".to_string()));
        }
        if !self.input_range.is_finite() || self.input_range <= 0.0 {
            return Err(ModelError::Config(format!(
                "input_range must be finite and > 0, got {}",
                self.input_range
            )));
        }
        if let Some(prefixes) = &self.linear_prefixes {
            if prefixes.len() != self.linear_count() {
                return Err(ModelError::Config(format!(
                    "{} linear prefixes given for {} linear layers",
                    prefixes.len(),
                    self.linear_count()
                )));
            }
        }
        Ok(())
    }

    /// Total width of all embedding outputs
    pub fn embedding_width(&self) -> usize {
        self.embeddings.iter().map(|e| e.embedding_dim).sum()
    }

    /// Number of linear layers (hidden plus output)
    pub fn linear_count(&self) -> usize {
        self.hidden_sizes.len() + 1
    }

    /// Snapshot tensor prefix of embedding `index`
    pub fn embedding_prefix(&self, index: usize) -> String {
        match self.embeddings.get(index).and_then(|e| e.tensor_prefix.clone()) {
            Some(prefix) => prefix,
            None if self.embeddings.len() == 1 => "em".to_string(),
            None => format!("em{}", index),
        }
    }

    /// Snapshot tensor prefix of linear layer `index`
    pub fn linear_prefix(&self, index: usize) -> String {
        self.linear_prefixes
            .as_ref()
            .and_then(|p| p.get(index).cloned())
            .unwrap_or_else(|| format!("l{}", index))
    }

    /// Derive layer shapes, querying `features` for the external sizes
    pub fn resolve(&self, features: &dyn FeatureSource) -> Result<ResolvedShapes> {
        self.validate()?;
        let point_dims = features.point_dims();
        let embedding_count = features.embedding_count();
        if point_dims == 0 || embedding_count == 0 {
            return Err(ModelError::Config(format!(
                "feature source reported point_dims={} embedding_count={}",
                point_dims, embedding_count
            )));
        }

        let embeddings = self
            .embeddings
            .iter()
            .map(|e| {
                let rows = embedding_count.div_ceil(e.resolution_ratio as usize);
                (rows, e.embedding_dim, e.resolution_ratio)
            })
            .collect();

        let mut linears = Vec::with_capacity(self.linear_count());
        let mut in_features = point_dims + self.embedding_width();
        for &out in self.hidden_sizes.iter().chain(std::iter::once(&self.output_size)) {
            linears.push((in_features, out));
            in_features = out;
        }

        Ok(ResolvedShapes { embeddings, linears })
    }
}

impl FeatureSource for ArchitectureConfig {
    fn point_dims(&self) -> usize {
        self.point_dims
    }

    fn embedding_count(&self) -> usize {
        self.embedding_count
    }
}
