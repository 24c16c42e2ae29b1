//! The inference runtime handle.
//!
//! One context is created at startup and lent to the pipeline builder and the
//! runner. It owns the tract framework front-ends (operator registries), so
//! they are built once per process instead of once per model load.

use std::path::Path;

use tract_hir::internal::*;

use crate::errors::CatdogResult;
use crate::model::{LoadedModel, ModelFormat};

pub struct InferenceContext {
    nnef: tract_nnef::framework::Nnef,
    #[cfg(feature = "onnx")]
    onnx: tract_onnx::Onnx,
    #[cfg(feature = "tf")]
    tf: tract_tensorflow::Tensorflow,
    #[cfg(feature = "tflite")]
    tflite: tract_tflite::Tflite,
}

impl Default for InferenceContext {
    fn default() -> InferenceContext {
        InferenceContext::new()
    }
}

impl std::fmt::Debug for InferenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InferenceContext {{ formats: {:?} }}", self.supported_formats())
    }
}

impl InferenceContext {
    pub fn new() -> InferenceContext {
        InferenceContext {
            nnef: tract_nnef::nnef().with_tract_core(),
            #[cfg(feature = "onnx")]
            onnx: tract_onnx::onnx(),
            #[cfg(feature = "tf")]
            tf: tract_tensorflow::tensorflow(),
            #[cfg(feature = "tflite")]
            tflite: tract_tflite::tflite(),
        }
    }

    pub fn supported_formats(&self) -> Vec<ModelFormat> {
        ModelFormat::ALL.iter().copied().filter(|f| f.is_enabled()).collect()
    }

    /// Parse a model file (or NNEF directory) into a tract graph.
    ///
    /// The file handle only lives for the duration of the call. Parse
    /// failures are runtime errors.
    pub fn load(&self, format: ModelFormat, path: &Path) -> CatdogResult<LoadedModel> {
        log::debug!("Loading {format:?} model from {path:?}");
        let model = match format {
            ModelFormat::Nnef => LoadedModel::Typed(self.nnef.model_for_path(path)?),
            #[cfg(feature = "onnx")]
            ModelFormat::Onnx => LoadedModel::Inference(self.onnx.model_for_path(path)?),
            #[cfg(feature = "tf")]
            ModelFormat::Tf => LoadedModel::Inference(self.tf.model_for_path(path)?),
            #[cfg(feature = "tflite")]
            ModelFormat::Tflite => LoadedModel::Typed(self.tflite.model_for_path(path)?),
            #[allow(unreachable_patterns)]
            other => {
                return Err(crate::errors::PipelineError::config(format!(
                    "{other:?} models are not supported by this build, enable the matching cargo feature"
                )));
            }
        };
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    #[cfg(all(feature = "onnx", feature = "tf", feature = "tflite"))]
    fn every_default_format_is_available() {
        let context = InferenceContext::new();
        assert_eq!(context.supported_formats().len(), ModelFormat::ALL.len());
    }

    #[test]
    #[cfg(all(feature = "onnx", feature = "tf", feature = "tflite"))]
    fn garbage_models_fail_in_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let context = InferenceContext::new();
        for (file, format) in [
            ("model.onnx", ModelFormat::Onnx),
            ("frozen.pb", ModelFormat::Tf),
            ("model.tflite", ModelFormat::Tflite),
        ] {
            let path = dir.path().join(file);
            std::fs::write(&path, [0xffu8; 16]).unwrap();
            let e = context.load(format, &path).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::Runtime, "{format:?}");
        }
    }
}
