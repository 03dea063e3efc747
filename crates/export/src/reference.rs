//! Fixed-point reference decoder
//!
//! Integer forward pass over an [`ExportedModel`], performing the same
//! operations as the embedded runtime does with the emitted tables. Used to
//! check the exported model against the float model.
//!
//! Domains: inputs are integers at `input_scale`, weights at the weight
//! factor, so an accumulator carries their product. The runtime works in
//! `f32` and its `round()` ties away from zero, independent of the export
//! rounding mode. Hidden activations are truncated back to the input domain
//! and clamped to `[0, 127]`.

use framenet_fixed_point::{IntWidth, QuantizedTensor};
use framenet_model::{lerp, sigmoid, EmbeddingQuery, InterpolationIndex};

use crate::config::ConventionKind;
use crate::error::{ExportError, Result};
use crate::exporter::{ExportedModel, QuantizedConstant};

/// Runs the integer forward pass of an exported model
pub struct FixedPointDecoder<'a> {
    model: &'a ExportedModel,
    point_dims: usize,
}

impl<'a> FixedPointDecoder<'a> {
    pub fn new(model: &'a ExportedModel) -> Result<Self> {
        let embedding_width: usize = model
            .layers()
            .values()
            .filter_map(|c| match c {
                QuantizedConstant::Embedding { weight, .. } => Some(weight.shape()[1]),
                QuantizedConstant::Linear { .. } => None,
            })
            .sum();

        let first_in = model
            .layers()
            .values()
            .find_map(|c| match c {
                QuantizedConstant::Linear { .. } => Some(c.generic_args().0),
                QuantizedConstant::Embedding { .. } => None,
            })
            .ok_or_else(|| ExportError::Config("exported model has no linear layers".to_string()))?;

        if first_in <= embedding_width {
            return Err(ExportError::ShapeMismatch {
                layer: "input".to_string(),
                expected: vec![embedding_width + 1],
                got: vec![first_in],
            });
        }

        Ok(Self {
            model,
            point_dims: first_in - embedding_width,
        })
    }

    pub fn point_dims(&self) -> usize {
        self.point_dims
    }

    /// Dequantized, interpolated embedding features for a query
    pub fn embed(&self, query: EmbeddingQuery) -> Result<Vec<f32>> {
        let q = self.model.weight_quantizer();
        let mut out = Vec::new();
        for constant in self.model.layers().values() {
            let QuantizedConstant::Embedding {
                weight,
                resolution_ratio,
            } = constant
            else {
                continue;
            };

            let rows = weight.shape()[0];
            let index = InterpolationIndex::resolve(query.index_for(rows, *resolution_ratio), rows)?;
            let (a, b) = (row(weight, index.i0)?, row(weight, index.i1)?);
            out.extend(
                a.iter()
                    .zip(b)
                    .map(|(&a, &b)| lerp(q.dequantize(a), q.dequantize(b), index.frac)),
            );
        }
        Ok(out)
    }

    /// Integer forward pass for one sample
    pub fn forward(&self, point: &[f32], query: EmbeddingQuery) -> Result<Vec<f32>> {
        if point.len() != self.point_dims {
            return Err(ExportError::ShapeMismatch {
                layer: "point".to_string(),
                expected: vec![self.point_dims],
                got: vec![point.len()],
            });
        }

        let input_scale = self.model.input_scale() as f32;
        let weight_factor = self.model.weight_quantizer().factor() as f32;
        let bias_factor = self.model.bias_quantizer().factor() as f32;
        let input_limit = IntWidth::I8.limit();
        let activation_max = match self.model.convention() {
            ConventionKind::ClipThenScale => input_limit as f32,
            ConventionKind::SharedScale => (self.model.input_range() * input_scale).round(),
        };

        let mut x: Vec<i64> = point
            .iter()
            .copied()
            .chain(self.embed(query)?)
            .map(|v| ((v * input_scale).round() as i64).clamp(-input_limit, input_limit))
            .collect();

        let linears: Vec<(&String, &QuantizedTensor, &QuantizedTensor)> = self
            .model
            .layers()
            .iter()
            .filter_map(|(name, c)| match c {
                QuantizedConstant::Linear { weight, bias } => Some((name, weight, bias)),
                QuantizedConstant::Embedding { .. } => None,
            })
            .collect();

        let mut output = Vec::new();
        for (i, (name, weight, bias)) in linears.iter().enumerate() {
            let (rows, cols) = (weight.shape()[0], weight.shape()[1]);
            if x.len() != cols {
                return Err(ExportError::ShapeMismatch {
                    layer: name.to_string(),
                    expected: vec![rows, x.len()],
                    got: weight.shape().to_vec(),
                });
            }

            let acc: Vec<i64> = (0..rows)
                .map(|o| {
                    let b = (bias.data()[o] as f32 / bias_factor * input_scale * weight_factor).round();
                    let dot: i64 = weight.data()[o * cols..(o + 1) * cols]
                        .iter()
                        .zip(&x)
                        .map(|(&w, &xi)| w as i64 * xi)
                        .sum();
                    b as i64 + dot
                })
                .collect();

            if i + 1 < linears.len() {
                x = acc
                    .iter()
                    .map(|&a| (a as f32 / weight_factor).clamp(0.0, activation_max) as i64)
                    .collect();
            } else {
                output = acc
                    .iter()
                    .map(|&a| sigmoid(a as f32 / input_scale / weight_factor))
                    .collect();
            }
        }
        Ok(output)
    }
}

fn row(tensor: &QuantizedTensor, index: usize) -> Result<&[i32]> {
    tensor.row(index).ok_or_else(|| ExportError::ShapeMismatch {
        layer: "embedding".to_string(),
        expected: vec![index + 1],
        got: tensor.shape().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfig;
    use crate::exporter::LayerExporter;
    use framenet_fixed_point::Tensor;
    use framenet_model::{EmbeddingTable, Layer, LinearWeights, Model, NamedLayer};

    /// Weights on the 1/127 grid quantize exactly
    fn grid_model() -> Model {
        let g = |n: i32| n as f32 / 127.0;
        let em = EmbeddingTable::new(Tensor::matrix(2, 1, vec![g(127), g(-127)]).unwrap(), 1).unwrap();
        let l0 = LinearWeights::new(
            Tensor::matrix(2, 2, vec![g(64), g(32), g(-127), g(0)]).unwrap(),
            Some(Tensor::vector(vec![g(10), g(0)])),
        )
        .unwrap();
        let l1 = LinearWeights::new(Tensor::matrix(1, 2, vec![g(127), g(127)]).unwrap(), None).unwrap();
        Model::new(vec![
            NamedLayer::new("em", Layer::Embedding(em)),
            NamedLayer::new("l0", Layer::Linear(l0)),
            NamedLayer::new("l1", Layer::Linear(l1)),
        ])
        .unwrap()
    }

    #[test]
    fn test_decoder_point_dims() {
        let exported = LayerExporter::new(ExportConfig::default())
            .unwrap()
            .export(&grid_model())
            .unwrap();
        assert_eq!(FixedPointDecoder::new(&exported).unwrap().point_dims(), 1);
    }

    #[test]
    fn test_embed_matches_float_at_rows() {
        let model = grid_model();
        let exported = LayerExporter::new(ExportConfig::default()).unwrap().export(&model).unwrap();
        let decoder = FixedPointDecoder::new(&exported).unwrap();

        for q in [0.0f32, 1.0, 5.0] {
            let float = model.embed(EmbeddingQuery::Index(q)).unwrap();
            let fixed = decoder.embed(EmbeddingQuery::Index(q)).unwrap();
            assert_eq!(float, fixed);
        }
    }

    #[test]
    fn test_forward_close_to_float() {
        let model = grid_model();
        let exported = LayerExporter::new(ExportConfig::default()).unwrap().export(&model).unwrap();
        let decoder = FixedPointDecoder::new(&exported).unwrap();

        for (p, q) in [(0.5f32, 0.0f32), (-0.25, 0.5), (1.0, 1.0)] {
            let float = model.forward(&[p], EmbeddingQuery::Index(q), 1.0).unwrap();
            let fixed = decoder.forward(&[p], EmbeddingQuery::Index(q)).unwrap();
            assert!((float[0] - fixed[0]).abs() < 0.02, "p={} q={}: {} vs {}", p, q, float[0], fixed[0]);
        }
    }

    /// Embedded runtime integer path, operation for operation, at the
    /// default clip and scale
    fn runtime_forward(exported: &ExportedModel, input: &[f32]) -> f32 {
        const WS: f32 = 127.0 / 1.0;
        const BS: f32 = 127.0 / 1.0;

        let linears: Vec<(&QuantizedTensor, &QuantizedTensor)> = exported
            .layers()
            .values()
            .filter_map(|c| match c {
                QuantizedConstant::Linear { weight, bias } => Some((weight, bias)),
                QuantizedConstant::Embedding { .. } => None,
            })
            .collect();

        let mut x: Vec<i8> = input
            .iter()
            .map(|i| ((i * WS).round() as i32).clamp(-127, 127) as i8)
            .collect();
        for (k, (weight, bias)) in linears.iter().enumerate() {
            let cols = weight.shape()[1];
            let out: Vec<i32> = (0..weight.shape()[0])
                .map(|o| {
                    let mut acc = (bias.data()[o] as f32 / BS * WS * WS).round() as i32;
                    for i in 0..cols {
                        acc += x[i] as i32 * weight.data()[o * cols + i];
                    }
                    acc
                })
                .collect();
            if k + 1 == linears.len() {
                return sigmoid(out[0] as f32 / WS / WS);
            }
            x = out.iter().map(|&a| (a as f32 / WS).clamp(0.0, 127.0) as i8).collect();
        }
        unreachable!("model has no linear layers")
    }

    #[test]
    fn test_hidden_activation_truncates() {
        let g = |n: i32| n as f32 / 127.0;
        let em = EmbeddingTable::new(Tensor::matrix(2, 1, vec![0.0, 0.0]).unwrap(), 1).unwrap();
        let l0 = LinearWeights::new(Tensor::matrix(1, 2, vec![g(64), 0.0]).unwrap(), None).unwrap();
        let l1 = LinearWeights::new(Tensor::matrix(1, 1, vec![g(127)]).unwrap(), None).unwrap();
        let model = Model::new(vec![
            NamedLayer::new("em", Layer::Embedding(em)),
            NamedLayer::new("l0", Layer::Linear(l0)),
            NamedLayer::new("l1", Layer::Linear(l1)),
        ])
        .unwrap();
        let exported = LayerExporter::new(ExportConfig::default()).unwrap().export(&model).unwrap();
        let decoder = FixedPointDecoder::new(&exported).unwrap();

        // Hidden accumulator 64 is 64/127 of one input step and truncates to 0
        let out = decoder.forward(&[g(1)], EmbeddingQuery::Index(0.0)).unwrap();
        assert_eq!(out, vec![0.5]);
        assert_eq!(runtime_forward(&exported, &[g(1), 0.0]), 0.5);
    }

    #[test]
    fn test_forward_matches_runtime() {
        let model = grid_model()
            .with_tensor("l0", "bias", Tensor::vector(vec![0.3, -0.55]))
            .unwrap();
        let exported = LayerExporter::new(ExportConfig::default()).unwrap().export(&model).unwrap();
        let decoder = FixedPointDecoder::new(&exported).unwrap();

        for (p, q) in [(0.5f32, 0.0f32), (-0.25, 0.5), (1.0, 1.0), (0.7, 0.25), (-1.0, 3.0)] {
            let mut input = vec![p];
            input.extend(decoder.embed(EmbeddingQuery::Index(q)).unwrap());
            let fixed = decoder.forward(&[p], EmbeddingQuery::Index(q)).unwrap();
            assert_eq!(fixed, vec![runtime_forward(&exported, &input)], "p={} q={}", p, q);
        }
    }

    #[test]
    fn test_forward_rejects_wrong_point_width() {
        let exported = LayerExporter::new(ExportConfig::default())
            .unwrap()
            .export(&grid_model())
            .unwrap();
        let decoder = FixedPointDecoder::new(&exported).unwrap();
        assert!(matches!(
            decoder.forward(&[0.0, 0.0], EmbeddingQuery::Index(0.0)),
            Err(ExportError::ShapeMismatch { .. })
        ));
    }
}
