//! framenet export
//!
//! Quantizes a trained coordinate network and generates the Rust constant
//! table compiled into the fixed-point runtime, plus a reference decoder
//! for checking the result against the float model.

mod artifact;
mod config;
mod emitter;
mod error;
mod exporter;
mod pipeline;
mod reference;

pub use artifact::write_atomic;
pub use config::{ConventionKind, ExportConfig};
pub use emitter::{emit, format_f32};
pub use error::{ExportError, Result};
pub use exporter::{ConstValue, ExportedModel, HeaderConstant, LayerExporter, QuantizedConstant};
pub use pipeline::{ExportPipeline, ExportSummary};
pub use reference::FixedPointDecoder;
