//! Code-generation emitter
//!
//! Renders an [`ExportedModel`] as Rust constant declarations:
//!
//! ```text
//! // framenet fixed-point export: rounding=half-to-even convention=clip-then-scale
//! pub const WEIGHT_CLIP_RANGE: f32 = 1.0;
//! pub static EM: Embedding<820,32> = Embedding{weight:[[12,-3,..],..]};
//! pub static L0: Linear<88,128> = Linear{weight:[[..],..],bias:[..]};
//! ```
//!
//! Output depends only on the exported model, so the same model and config
//! always produce the same bytes.

use framenet_fixed_point::QuantizedTensor;

use crate::exporter::{ConstValue, ExportedModel};

/// Render the whole artifact
pub fn emit(model: &ExportedModel) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "// framenet fixed-point export: rounding={} convention={}\n",
        model.rounding(),
        model.convention()
    ));

    for constant in model.constants() {
        let (ty, literal) = const_literal(constant.value);
        out.push_str(&format!("pub const {}: {} = {};\n", constant.name, ty, literal));
    }

    for (name, layer) in model.layers() {
        let ty = layer.type_name();
        let (d0, d1) = layer.generic_args();
        out.push_str(&format!("pub static {}: {}<{},{}> = {}{{", name, ty, d0, d1, ty));
        for (i, (field, tensor)) in layer.fields().into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(field);
            out.push(':');
            push_tensor(&mut out, tensor);
        }
        out.push_str("};\n");
    }

    out
}

fn const_literal(value: ConstValue) -> (&'static str, String) {
    match value {
        ConstValue::F32(v) => ("f32", format_f32(v)),
        ConstValue::I32(v) => ("i32", v.to_string()),
        ConstValue::Usize(v) => ("usize", v.to_string()),
    }
}

/// Shortest round-trip decimal, always with a decimal point
pub fn format_f32(value: f32) -> String {
    let s = value.to_string();
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Nested array literal, outer dimension first
fn push_tensor(out: &mut String, tensor: &QuantizedTensor) {
    match tensor.rank() {
        0 => push_values(out, tensor.data()),
        1 => push_array(out, tensor.data()),
        _ => {
            let cols = tensor.shape()[1];
            out.push('[');
            for (i, row) in tensor.data().chunks(cols.max(1)).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_array(out, row);
            }
            out.push(']');
        }
    }
}

fn push_array(out: &mut String, values: &[i32]) {
    out.push('[');
    push_values(out, values);
    out.push(']');
}

fn push_values(out: &mut String, values: &[i32]) {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
}
