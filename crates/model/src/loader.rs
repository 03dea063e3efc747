//! Safetensors model snapshot loading and saving

use std::fs::File;
use std::io::Read;
use std::path::Path;

use framenet_fixed_point::Tensor;
use half::{bf16, f16};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::config::ArchitectureConfig;
use crate::embedding::EmbeddingTable;
use crate::error::{ModelError, Result};
use crate::native::FeatureSource;
use crate::network::Model;
use crate::weights::{Layer, LinearWeights, NamedLayer};

/// File name of the weights inside a snapshot directory
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// File name of the architecture inside a snapshot directory
pub const CONFIG_FILE: &str = "config.json";

/// Load model weights from a safetensors file
pub struct SafetensorsLoader {
    /// Raw safetensors data
    data: Vec<u8>,
    /// Model architecture
    pub config: ArchitectureConfig,
}

impl SafetensorsLoader {
    /// Load from a directory containing model.safetensors and config.json
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let config = ArchitectureConfig::from_json_file(dir.join(CONFIG_FILE))?;

        let mut file = File::open(dir.join(WEIGHTS_FILE))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        tracing::debug!(dir = %dir.display(), bytes = data.len(), "read model snapshot");
        Self::from_bytes(data, config)
    }

    /// Wrap in-memory safetensors bytes
    pub fn from_bytes(data: Vec<u8>, config: ArchitectureConfig) -> Result<Self> {
        config.validate()?;
        SafeTensors::deserialize(&data).map_err(|e| ModelError::Safetensors(e.to_string()))?;
        Ok(Self { data, config })
    }

    /// Get tensor names in the safetensors file, sorted
    pub fn tensor_names(&self) -> Result<Vec<String>> {
        let tensors = self.tensors()?;
        let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn tensors(&self) -> Result<SafeTensors<'_>> {
        SafeTensors::deserialize(&self.data).map_err(|e| ModelError::Safetensors(e.to_string()))
    }

    /// Load a tensor as f32, checking its shape and that every value is finite
    pub fn load_tensor(&self, name: &str, expected: &[usize]) -> Result<Tensor> {
        let tensors = self.tensors()?;
        let view = tensors
            .tensor(name)
            .map_err(|_| ModelError::MissingTensor(name.to_string()))?;

        if view.shape() != expected {
            return Err(ModelError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                got: view.shape().to_vec(),
            });
        }

        let bytes = view.data();
        let values: Vec<f32> = match view.dtype() {
            Dtype::F32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Dtype::F16 => bytes
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            Dtype::BF16 => bytes
                .chunks_exact(2)
                .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            other => {
                return Err(ModelError::UnsupportedDtype {
                    name: name.to_string(),
                    got: format!("{:?}", other),
                });
            }
        };

        let tensor = Tensor::from_shape(expected.to_vec(), values)?;
        if let Some((index, value)) = tensor.first_non_finite() {
            return Err(ModelError::NonFiniteParameter {
                name: name.to_string(),
                index,
                value,
            });
        }
        Ok(tensor)
    }

    fn has_tensor(&self, name: &str) -> Result<bool> {
        Ok(self.tensors()?.tensor(name).is_ok())
    }

    /// Load the full model.
    ///
    /// `features` supplies the point and embedding sizes; pass the loader's
    /// own config when the snapshot is self-describing.
    pub fn load_model(&self, features: &dyn FeatureSource) -> Result<Model> {
        let shapes = self.config.resolve(features)?;
        let mut layers = Vec::with_capacity(shapes.embeddings.len() + shapes.linears.len());

        for (i, &(rows, dim, ratio)) in shapes.embeddings.iter().enumerate() {
            let prefix = self.config.embedding_prefix(i);
            let weight = self.load_tensor(&format!("{}.weight", prefix), &[rows, dim])?;
            layers.push(NamedLayer::new(prefix, Layer::Embedding(EmbeddingTable::new(weight, ratio)?)));
        }

        for (i, &(in_features, out_features)) in shapes.linears.iter().enumerate() {
            let prefix = self.config.linear_prefix(i);
            let weight = self.load_tensor(&format!("{}.weight", prefix), &[out_features, in_features])?;

            let bias_name = format!("{}.bias", prefix);
            let bias = if self.has_tensor(&bias_name)? {
                Some(self.load_tensor(&bias_name, &[out_features])?)
            } else {
                tracing::debug!(layer = %prefix, "no bias tensor in snapshot");
                None
            };
            layers.push(NamedLayer::new(prefix, Layer::Linear(LinearWeights::new(weight, bias)?)));
        }

        let model = Model::new(layers)?;
        tracing::info!(
            layers = model.layers().len(),
            parameters = model.parameter_count(),
            "loaded model snapshot"
        );
        Ok(model)
    }
}

/// Serialize a model to safetensors bytes (f32, `<layer>.<field>` names)
pub fn serialize_model(model: &Model) -> Result<Vec<u8>> {
    let mut entries: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
    for named in model.layers() {
        for (field, tensor) in named.layer.tensors() {
            let bytes = tensor.data().iter().flat_map(|x| x.to_le_bytes()).collect();
            entries.push((format!("{}.{}", named.name, field), tensor.shape().to_vec(), bytes));
        }
    }

    let views = entries
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| ModelError::Safetensors(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    safetensors::serialize(views, &None).map_err(|e| ModelError::Safetensors(e.to_string()))
}

/// Write a model to a safetensors file
pub fn save_safetensors<P: AsRef<Path>>(model: &Model, path: P) -> Result<()> {
    std::fs::write(path, serialize_model(model)?)?;
    Ok(())
}

/// Write a snapshot directory (model.safetensors and config.json)
pub fn save_directory<P: AsRef<Path>>(model: &Model, config: &ArchitectureConfig, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    save_safetensors(model, dir.join(WEIGHTS_FILE))?;
    config.to_json_file(dir.join(CONFIG_FILE))?;
    tracing::info!(dir = %dir.display(), "wrote model snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn tiny_config() -> ArchitectureConfig {
        ArchitectureConfig {
            point_dims: 2,
            embedding_count: 5,
            hidden_sizes: vec![3],
            embeddings: vec![crate::config::EmbeddingConfig {
                embedding_dim: 2,
                resolution_ratio: 1,
                tensor_prefix: None,
            }],
            ..Default::default()
        }
    }

    fn raw_file(tensors: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)>) -> Vec<u8> {
        let views: Vec<(&str, TensorView)> = tensors
            .iter()
            .map(|(name, dtype, shape, bytes)| (*name, TensorView::new(*dtype, shape.clone(), bytes).unwrap()))
            .collect();
        safetensors::serialize(views, &None).unwrap()
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    #[test]
    fn test_serialize_then_load() {
        let config = tiny_config();
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let model = Model::random(&config, &config, &mut rng).unwrap();

        let loader = SafetensorsLoader::from_bytes(serialize_model(&model).unwrap(), config.clone()).unwrap();
        assert_eq!(
            loader.tensor_names().unwrap(),
            vec!["em.weight", "l0.bias", "l0.weight", "l1.bias", "l1.weight"]
        );
        assert_eq!(loader.load_model(&config).unwrap(), model);
    }

    #[test]
    fn test_half_precision_tensors() {
        let loader = SafetensorsLoader::from_bytes(
            raw_file(vec![
                (
                    "h",
                    Dtype::F16,
                    vec![2],
                    [f16::from_f32(0.5), f16::from_f32(-2.0)]
                        .iter()
                        .flat_map(|x| x.to_le_bytes())
                        .collect(),
                ),
                ("b", Dtype::BF16, vec![1], bf16::from_f32(1.0).to_le_bytes().to_vec()),
            ]),
            tiny_config(),
        )
        .unwrap();

        assert_eq!(loader.load_tensor("h", &[2]).unwrap().data(), &[0.5, -2.0]);
        assert_eq!(loader.load_tensor("b", &[1]).unwrap().data(), &[1.0]);
    }

    #[test]
    fn test_load_tensor_errors() {
        let loader = SafetensorsLoader::from_bytes(
            raw_file(vec![
                ("w", Dtype::F32, vec![2], f32_bytes(&[1.0, f32::NAN])),
                ("i", Dtype::I32, vec![1], 7i32.to_le_bytes().to_vec()),
            ]),
            tiny_config(),
        )
        .unwrap();

        assert!(matches!(loader.load_tensor("missing", &[1]), Err(ModelError::MissingTensor(_))));
        assert!(matches!(loader.load_tensor("w", &[3]), Err(ModelError::ShapeMismatch { .. })));
        assert!(matches!(
            loader.load_tensor("w", &[2]),
            Err(ModelError::NonFiniteParameter { index: 1, .. })
        ));
        assert!(matches!(loader.load_tensor("i", &[1]), Err(ModelError::UnsupportedDtype { .. })));
    }

    #[test]
    fn test_missing_bias_is_none() {
        let config = tiny_config();
        let bytes = raw_file(vec![
            ("em.weight", Dtype::F32, vec![5, 2], f32_bytes(&[0.1; 10])),
            ("l0.weight", Dtype::F32, vec![3, 4], f32_bytes(&[0.2; 12])),
            ("l1.weight", Dtype::F32, vec![1, 3], f32_bytes(&[0.3; 3])),
            ("l1.bias", Dtype::F32, vec![1], f32_bytes(&[0.4])),
        ]);
        let model = SafetensorsLoader::from_bytes(bytes, config.clone())
            .unwrap()
            .load_model(&config)
            .unwrap();

        let biases: Vec<bool> = model.linears().map(|l| l.bias().is_some()).collect();
        assert_eq!(biases, vec![false, true]);
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        assert!(matches!(
            SafetensorsLoader::from_bytes(vec![1, 2, 3], tiny_config()),
            Err(ModelError::Safetensors(_))
        ));
    }
}
