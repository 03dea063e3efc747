//! Layer exporter
//!
//! Walks a model in runtime forward order and quantizes every layer into a
//! named, shape-typed constant. Shapes come from the live model only.

use indexmap::IndexMap;

use framenet_fixed_point::{shared_scale, QuantizedTensor, Quantizer, RoundingMode};
use framenet_model::{Layer, Model};

use crate::config::{ConventionKind, ExportConfig};
use crate::error::{ExportError, Result};

/// A quantized layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantizedConstant {
    /// Table `[table_size, embedding_dim]`
    Embedding {
        weight: QuantizedTensor,
        resolution_ratio: u32,
    },
    /// Weight `[out_features, in_features]` and bias `[out_features]`
    Linear {
        weight: QuantizedTensor,
        bias: QuantizedTensor,
    },
}

impl QuantizedConstant {
    /// Runtime type name
    pub fn type_name(&self) -> &'static str {
        match self {
            QuantizedConstant::Embedding { .. } => "Embedding",
            QuantizedConstant::Linear { .. } => "Linear",
        }
    }

    /// Generic arguments of the runtime type: `<TableSize, Dim>` or
    /// `<InFeatures, OutFeatures>`
    pub fn generic_args(&self) -> (usize, usize) {
        match self {
            QuantizedConstant::Embedding { weight, .. } => (weight.shape()[0], weight.shape()[1]),
            QuantizedConstant::Linear { weight, .. } => (weight.shape()[1], weight.shape()[0]),
        }
    }

    /// Fields in emission order
    pub fn fields(&self) -> Vec<(&'static str, &QuantizedTensor)> {
        match self {
            QuantizedConstant::Embedding { weight, .. } => vec![("weight", weight)],
            QuantizedConstant::Linear { weight, bias } => vec![("weight", weight), ("bias", bias)],
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.fields().iter().map(|(_, t)| t.len()).sum()
    }
}

/// Numeric value of a header constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    F32(f32),
    I32(i32),
    Usize(usize),
}

/// A global constant written ahead of the layer tables
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderConstant {
    pub name: String,
    pub value: ConstValue,
}

impl HeaderConstant {
    fn new(name: impl Into<String>, value: ConstValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Result of an export: header constants plus layers in forward order
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedModel {
    convention: ConventionKind,
    rounding: RoundingMode,
    weight_quantizer: Quantizer,
    bias_quantizer: Quantizer,
    input_range: f32,
    input_scale: f64,
    constants: Vec<HeaderConstant>,
    layers: IndexMap<String, QuantizedConstant>,
}

impl ExportedModel {
    pub fn convention(&self) -> ConventionKind {
        self.convention
    }

    pub fn rounding(&self) -> RoundingMode {
        self.rounding
    }

    pub fn weight_quantizer(&self) -> &Quantizer {
        &self.weight_quantizer
    }

    pub fn bias_quantizer(&self) -> &Quantizer {
        &self.bias_quantizer
    }

    pub fn input_range(&self) -> f32 {
        self.input_range
    }

    /// Multiplier from real layer inputs to the integer input domain
    pub fn input_scale(&self) -> f64 {
        self.input_scale
    }

    pub fn constants(&self) -> &[HeaderConstant] {
        &self.constants
    }

    /// Layers keyed by symbol name, in forward order
    pub fn layers(&self) -> &IndexMap<String, QuantizedConstant> {
        &self.layers
    }

    pub fn get(&self, name: &str) -> Option<&QuantizedConstant> {
        self.layers.get(name)
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.values().map(QuantizedConstant::parameter_count).sum()
    }
}

/// Quantizes a model under an [`ExportConfig`]
#[derive(Debug, Clone)]
pub struct LayerExporter {
    config: ExportConfig,
    weight_quantizer: Quantizer,
    bias_quantizer: Quantizer,
}

impl LayerExporter {
    pub fn new(config: ExportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            weight_quantizer: config.weight_quantizer()?,
            bias_quantizer: config.bias_quantizer()?,
            config,
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Symbol names for a model's layers, embeddings first
    pub fn symbol_names(&self, model: &Model) -> Result<Vec<String>> {
        let embeddings = model.embeddings().count();
        let linears = model.linears().count();

        let embedding_names = match &self.config.embedding_names {
            Some(names) => checked_names("embedding", names, embeddings)?,
            None if embeddings == 1 => vec!["EM".to_string()],
            None => (0..embeddings).map(|i| format!("EM{}", i)).collect(),
        };
        let linear_names = match &self.config.linear_names {
            Some(names) => checked_names("linear", names, linears)?,
            None => (0..linears).map(|i| format!("L{}", i)).collect(),
        };

        Ok(embedding_names.into_iter().chain(linear_names).collect())
    }

    /// Quantize every layer of `model`.
    ///
    /// Fails before quantizing anything if a parameter is NaN or infinite.
    /// The model is clipped on a copy; the caller's model is untouched.
    pub fn export(&self, model: &Model) -> Result<ExportedModel> {
        let names = self.symbol_names(model)?;
        check_shapes(model)?;
        check_finite(model)?;

        let clip = self.config.clip_range()?;
        let clipped_count = model.count_clipped(clip);
        if clipped_count > 0 {
            tracing::warn!(values = clipped_count, "parameters outside the clip range were clipped");
        }
        let clipped = model.clipped(clip);

        let mut layers = IndexMap::with_capacity(names.len());
        for (name, named) in names.into_iter().zip(clipped.layers()) {
            let constant = match &named.layer {
                Layer::Embedding(table) => QuantizedConstant::Embedding {
                    weight: self.weight_quantizer.quantize_tensor(table.weight())?,
                    resolution_ratio: table.resolution_ratio(),
                },
                Layer::Linear(linear) => QuantizedConstant::Linear {
                    weight: self.weight_quantizer.quantize_tensor(linear.weight())?,
                    bias: match linear.bias() {
                        Some(b) => self.bias_quantizer.quantize_tensor(b)?,
                        None => QuantizedTensor::from_raw(
                            vec![linear.out_features()],
                            vec![0; linear.out_features()],
                            self.bias_quantizer.width(),
                        )?,
                    },
                },
            };

            let (d0, d1) = constant.generic_args();
            tracing::debug!(layer = %name, kind = constant.type_name(), d0, d1, "quantized layer");
            layers.insert(name, constant);
        }

        Ok(ExportedModel {
            convention: self.config.convention,
            rounding: self.config.rounding,
            weight_quantizer: self.weight_quantizer,
            bias_quantizer: self.bias_quantizer,
            input_range: self.config.input_range,
            input_scale: self.config.input_scale()?,
            constants: self.header_constants(&layers)?,
            layers,
        })
    }

    fn header_constants(&self, layers: &IndexMap<String, QuantizedConstant>) -> Result<Vec<HeaderConstant>> {
        let c = &self.config;
        let mut constants = match c.convention {
            ConventionKind::ClipThenScale => vec![
                HeaderConstant::new("WEIGHT_CLIP_RANGE", ConstValue::F32(c.weight_clip)),
                HeaderConstant::new("WEIGHT_QUANT_RANGE", ConstValue::F32(c.weight_scale as f32)),
                HeaderConstant::new("BIAS_CLIP_RANGE", ConstValue::F32(c.bias_clip)),
                HeaderConstant::new("BIAS_QUANT_RANGE", ConstValue::F32(c.bias_scale as f32)),
                HeaderConstant::new("INPUT_RANGE", ConstValue::F32(c.input_range)),
            ],
            ConventionKind::SharedScale => vec![
                HeaderConstant::new("INPUT_RANGE", ConstValue::F32(c.input_range)),
                HeaderConstant::new("WEIGHT_RANGE", ConstValue::F32(c.weight_clip)),
                HeaderConstant::new("INPUT_SCALE", ConstValue::I32(shared_scale(c.input_range)?)),
                HeaderConstant::new("WEIGHT_SCALE", ConstValue::I32(self.weight_quantizer.scale())),
                HeaderConstant::new("BIAS_SCALE", ConstValue::I32(self.bias_quantizer.scale())),
            ],
        };

        for (name, constant) in layers {
            if let QuantizedConstant::Embedding { resolution_ratio, .. } = constant {
                if *resolution_ratio != 1 {
                    constants.push(HeaderConstant::new(
                        format!("{}_RESOLUTION_RATIO", name),
                        ConstValue::Usize(*resolution_ratio as usize),
                    ));
                }
            }
        }
        Ok(constants)
    }
}

fn checked_names(kind: &str, names: &[String], count: usize) -> Result<Vec<String>> {
    if names.len() != count {
        return Err(ExportError::Config(format!(
            "{} {} names given for {} {} layers",
            names.len(),
            kind,
            count,
            kind
        )));
    }
    Ok(names.to_vec())
}

/// Re-derive the shape chain from the live model
fn check_shapes(model: &Model) -> Result<()> {
    let mut expected_in = model.point_dims() + model.embedding_width();
    for named in model.layers() {
        let Layer::Linear(linear) = &named.layer else {
            continue;
        };
        let shape = linear.weight().shape();
        if shape.len() != 2 || shape[1] != expected_in {
            return Err(ExportError::ShapeMismatch {
                layer: named.name.clone(),
                expected: vec![linear.out_features(), expected_in],
                got: shape.to_vec(),
            });
        }
        if let Some(bias) = linear.bias() {
            if bias.shape() != [shape[0]] {
                return Err(ExportError::ShapeMismatch {
                    layer: format!("{}.bias", named.name),
                    expected: vec![shape[0]],
                    got: bias.shape().to_vec(),
                });
            }
        }
        expected_in = shape[0];
    }
    Ok(())
}

fn check_finite(model: &Model) -> Result<()> {
    for named in model.layers() {
        for (field, tensor) in named.layer.tensors() {
            if let Some((index, value)) = tensor.first_non_finite() {
                return Err(ExportError::NonFiniteParameter {
                    layer: named.name.clone(),
                    field: field.to_string(),
                    index,
                    value,
                });
            }
        }
    }
    Ok(())
}
