//! framenet float model
//!
//! Coordinate network weights, temporal embedding interpolation, the float
//! forward pass and safetensors snapshot I/O. The native feature library is
//! reached only through the traits in [`native`].

mod config;
mod embedding;
mod error;
mod loader;
pub mod native;
mod network;
mod weights;

pub use config::{ArchitectureConfig, EmbeddingConfig, ResolvedShapes};
pub use embedding::{lerp, lookup_all, EmbeddingQuery, EmbeddingTable, InterpolationIndex};
pub use error::{ModelError, Result};
pub use loader::{save_directory, save_safetensors, serialize_model, SafetensorsLoader, CONFIG_FILE, WEIGHTS_FILE};
pub use native::{Batch, BatchSource, EmbeddingBatch, FeatureSource, LoaderGuard};
pub use network::{sigmoid, Model};
pub use weights::{ClipRange, Layer, LinearWeights, NamedLayer};
