//! End-to-end export pipeline: snapshot in, constant table out

use std::path::{Path, PathBuf};

use framenet_model::{Model, SafetensorsLoader};

use crate::artifact::write_atomic;
use crate::config::ExportConfig;
use crate::emitter::emit;
use crate::error::Result;
use crate::exporter::{ExportedModel, LayerExporter};

/// Outcome of a completed export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    /// Destination of the artifact
    pub path: PathBuf,
    /// Exported layers
    pub layers: usize,
    /// Integers written across all tables
    pub parameters: usize,
    /// Values clamped to the clip range before quantization
    pub clipped: usize,
    /// Artifact size in bytes
    pub bytes: usize,
}

/// Export pipeline
pub struct ExportPipeline {
    exporter: LayerExporter,
}

impl ExportPipeline {
    /// Create a pipeline, validating the config
    pub fn new(config: ExportConfig) -> Result<Self> {
        Ok(Self {
            exporter: LayerExporter::new(config)?,
        })
    }

    pub fn config(&self) -> &ExportConfig {
        self.exporter.config()
    }

    /// Quantize a model without writing anything
    pub fn export(&self, model: &Model) -> Result<ExportedModel> {
        self.exporter.export(model)
    }

    /// Quantize and render a model to source text
    pub fn render(&self, model: &Model) -> Result<String> {
        Ok(emit(&self.export(model)?))
    }

    /// Export a model to `out`.
    ///
    /// Everything is computed in memory first; the file appears only if
    /// the whole export succeeds.
    pub fn write(&self, model: &Model, out: &Path) -> Result<ExportSummary> {
        let clipped = model.count_clipped(self.config().clip_range()?);
        let exported = self.export(model)?;
        let text = emit(&exported);
        write_atomic(out, text.as_bytes())?;

        let summary = ExportSummary {
            path: out.to_path_buf(),
            layers: exported.layers().len(),
            parameters: exported.parameter_count(),
            clipped,
            bytes: text.len(),
        };
        tracing::info!(
            path = %summary.path.display(),
            layers = summary.layers,
            parameters = summary.parameters,
            clipped = summary.clipped,
            bytes = summary.bytes,
            convention = %exported.convention(),
            rounding = %exported.rounding(),
            "export complete"
        );
        Ok(summary)
    }

    /// Load a snapshot directory and export it to `out`
    pub fn write_from_directory(&self, model_dir: &Path, out: &Path) -> Result<ExportSummary> {
        tracing::info!(dir = %model_dir.display(), "loading model snapshot");
        let loader = SafetensorsLoader::from_directory(model_dir)?;
        let model = loader.load_model(&loader.config)?;
        self.write(&model, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framenet_model::ArchitectureConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("model.rs");
        let config = ArchitectureConfig::default();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let model = Model::random(&config, &config, &mut rng).unwrap();

        let pipeline = ExportPipeline::new(ExportConfig::default()).unwrap();
        let summary = pipeline.write(&model, &out).unwrap();

        assert_eq!(summary.layers, 4);
        assert_eq!(summary.parameters, model.parameter_count());
        assert_eq!(summary.clipped, 0);
        assert_eq!(summary.bytes, std::fs::metadata(&out).unwrap().len() as usize);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), pipeline.render(&model).unwrap());
    }
}
