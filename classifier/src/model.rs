//! Model discovery, tensor name binding and optimization.

use std::path::{Path, PathBuf};

use tract_hir::internal::*;

use crate::errors::{CatdogResult, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Nnef,
    Onnx,
    Tf,
    Tflite,
}

impl ModelFormat {
    pub const ALL: &'static [ModelFormat] =
        &[ModelFormat::Tflite, ModelFormat::Onnx, ModelFormat::Tf, ModelFormat::Nnef];

    pub fn is_enabled(&self) -> bool {
        match self {
            ModelFormat::Nnef => true,
            ModelFormat::Onnx => cfg!(feature = "onnx"),
            ModelFormat::Tf => cfg!(feature = "tf"),
            ModelFormat::Tflite => cfg!(feature = "tflite"),
        }
    }

    /// Guess the format from a file name.
    pub fn for_file(path: &Path) -> Option<ModelFormat> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".tflite") {
            Some(ModelFormat::Tflite)
        } else if name.ends_with(".onnx") {
            Some(ModelFormat::Onnx)
        } else if name.ends_with(".pb") {
            Some(ModelFormat::Tf)
        } else if name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ModelFormat::Nnef)
        } else {
            None
        }
    }
}

/// File names looked up first in a model directory, in order.
const WELL_KNOWN_MODEL_FILES: &[&str] =
    &["model.tflite", "model.onnx", "model.pb", "frozen_graph.pb", "model.nnef.tar", "model.nnef.tgz"];

/// Find the model file behind `location` and its format.
///
/// `location` may be a model file, a NNEF directory (with a `graph.nnef`), or
/// a directory holding the model file: either one of the well-known names or
/// the single file with a supported extension.
pub fn discover(location: &Path) -> CatdogResult<(PathBuf, ModelFormat)> {
    let metadata = fs_err::metadata(location).map_err(|e| PipelineError::io(location, e))?;
    if !metadata.is_dir() {
        let format = ModelFormat::for_file(location).ok_or_else(|| {
            PipelineError::config(format!("can not guess the model format of {location:?}"))
        })?;
        return Ok((location.to_path_buf(), format));
    }
    if location.join("graph.nnef").exists() {
        return Ok((location.to_path_buf(), ModelFormat::Nnef));
    }
    for name in WELL_KNOWN_MODEL_FILES {
        let candidate = location.join(name);
        if candidate.is_file() {
            let format = ModelFormat::for_file(&candidate).unwrap_or(ModelFormat::Nnef);
            return Ok((candidate, format));
        }
    }
    let mut candidates = vec![];
    for entry in fs_err::read_dir(location).map_err(|e| PipelineError::io(location, e))? {
        let path = entry.map_err(|e| PipelineError::io(location, e))?.path();
        if path.is_file() {
            if let Some(format) = ModelFormat::for_file(&path) {
                candidates.push((path, format));
            }
        }
    }
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(PipelineError::config(format!("no model file found in {location:?}"))),
        _ => Err(PipelineError::config(format!(
            "several model files found in {location:?}: {:?}",
            candidates.iter().map(|c| &c.0).collect::<Vec<_>>()
        ))),
    }
}

/// A freshly parsed model. ONNX and TensorFlow graphs still need type
/// inference, NNEF and TFLite graphs are typed from the start.
#[derive(Debug)]
pub enum LoadedModel {
    Inference(InferenceModel),
    Typed(TypedModel),
}

fn without_slot_zero(name: &str) -> &str {
    name.strip_suffix(":0").unwrap_or(name)
}

/// Look a tensor name up in a graph.
///
/// The declared outputs and inputs are tried first, by outlet label or node
/// name: loaders may keep the exported name on an intermediate node (NNEF
/// inserts casts named after the result) while the declared output carries
/// it as a label. Then any outlet label, then any node name (its first
/// output) and finally `node:slot`. A `:0` suffix is optional on both sides,
/// TensorFlow converters tend to keep it.
pub fn find_tensor<F, O>(model: &Graph<F, O>, name: &str) -> Option<OutletId>
where
    F: Fact + Clone + 'static,
    O: std::fmt::Debug + std::fmt::Display + AsRef<dyn Op> + AsMut<dyn Op> + Clone + 'static,
{
    let wanted = without_slot_zero(name);
    let labelled = |outlet: &OutletId| {
        model.outlet_label(*outlet).is_some_and(|label| without_slot_zero(label) == wanted)
    };
    let named = |outlet: &OutletId| {
        outlet.slot == 0 && without_slot_zero(&model.node(outlet.node).name) == wanted
    };

    let declared: Vec<OutletId> = model
        .output_outlets()
        .ok()
        .into_iter()
        .flatten()
        .chain(model.input_outlets().ok().into_iter().flatten())
        .copied()
        .collect();
    if let Some(outlet) = declared.iter().find(|o| labelled(*o) || named(*o)) {
        return Some(*outlet);
    }

    let all: Vec<OutletId> = model
        .nodes()
        .iter()
        .flat_map(|node| (0..node.outputs.len()).map(move |slot| OutletId::new(node.id, slot)))
        .collect();
    let by_label = all.iter().find(|o| labelled(*o));
    if let Some(outlet) = by_label.or_else(|| all.iter().find(|o| named(*o))) {
        return Some(*outlet);
    }

    let (node, slot) = name.rsplit_once(':')?;
    let slot: usize = slot.parse().ok()?;
    let id = model.nodes().iter().find(|n| n.name == node)?.id;
    (slot < model.node(id).outputs.len()).then(|| OutletId::new(id, slot))
}

/// Make `input` and `output` the only input and output of the model.
pub fn bind_tensors<F, O>(model: &mut Graph<F, O>, input: &str, output: &str) -> CatdogResult<()>
where
    F: Fact + Clone + 'static,
    O: std::fmt::Debug + std::fmt::Display + AsRef<dyn Op> + AsMut<dyn Op> + Clone + 'static,
{
    let missing = |role: &str, name: &str| {
        let mut known: Vec<&str> = model.node_names().collect();
        known.truncate(20);
        PipelineError::config(format!(
            "{role} tensor {name:?} not found in model graph (nodes include: {})",
            known.join(", ")
        ))
    };
    let input_outlet = find_tensor(&*model, input).ok_or_else(|| missing("input", input))?;
    let output_outlet = find_tensor(&*model, output).ok_or_else(|| missing("output", output))?;
    log::debug!("Binding input {input:?} to {input_outlet:?}, output {output:?} to {output_outlet:?}");
    model.set_input_outlets(&[input_outlet])?;
    model.set_output_outlets(&[output_outlet])?;
    Ok(())
}

/// Bind the tensor names, pin the input type to f32 of `input_shape`, then
/// optimize.
///
/// Typed models declare their own input fact: a concrete shape or datum type
/// that disagrees with the pipeline is a configuration error. Inference
/// models get the fact imposed, as tract's command line does.
pub fn prepare(
    model: LoadedModel,
    input: &str,
    output: &str,
    input_shape: &[usize],
) -> CatdogResult<TypedModel> {
    let typed = match model {
        LoadedModel::Inference(mut model) => {
            bind_tensors(&mut model, input, output)?;
            model.set_input_fact(0, f32::fact(input_shape.to_vec()).into())?;
            model.into_optimized()?
        }
        LoadedModel::Typed(mut model) => {
            bind_tensors(&mut model, input, output)?;
            let fact = model.input_fact(0)?;
            if fact.datum_type != f32::datum_type() {
                return Err(PipelineError::config(format!(
                    "model input {input:?} expects {:?}, pixels are extracted as F32",
                    fact.datum_type
                )));
            }
            if let Some(shape) = fact.shape.as_concrete() {
                if shape != input_shape {
                    return Err(PipelineError::config(format!(
                        "model input {input:?} expects shape {shape:?}, pixels are extracted as {input_shape:?}"
                    )));
                }
            }
            model.into_optimized()?
        }
    };
    log::debug!("Optimized model: {} nodes", typed.nodes().len());
    Ok(typed)
}
