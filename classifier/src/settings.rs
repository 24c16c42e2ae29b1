use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::{CatdogResult, PipelineError};
use crate::stages::{PixelExtraction, ResizeMode};

/// Side of the square images the reference Keras model was trained on.
pub const REFERENCE_IMAGE_SIZE: u32 = 180;
pub const REFERENCE_INPUT_TENSOR: &str = "serving_default_input_1";
pub const REFERENCE_OUTPUT_TENSOR: &str = "StatefulPartitionedCall";

/// Everything needed to assemble and run the pipeline.
///
/// The tensor names must match the names embedded in the model graph. For a
/// Keras model they can be listed with `saved_model_cli show --dir <model> --all`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Model file, or directory containing it.
    pub model_location: PathBuf,
    /// Directory the image paths are relative to.
    pub data_location: PathBuf,
    pub image_height: u32,
    pub image_width: u32,
    pub input_tensor_name: String,
    pub output_tensor_name: String,
    pub resize_mode: ResizeMode,
    pub pixels: PixelExtraction,
}

impl Settings {
    /// Settings for the reference cat/dog model, laid out under `root` as
    /// `KerasModel/` and `TestData/`.
    pub fn reference(root: impl AsRef<Path>) -> Settings {
        let root = root.as_ref();
        Settings {
            model_location: root.join("KerasModel"),
            data_location: root.join("TestData"),
            image_height: REFERENCE_IMAGE_SIZE,
            image_width: REFERENCE_IMAGE_SIZE,
            input_tensor_name: REFERENCE_INPUT_TENSOR.to_string(),
            output_tensor_name: REFERENCE_OUTPUT_TENSOR.to_string(),
            resize_mode: ResizeMode::default(),
            pixels: PixelExtraction::default(),
        }
    }

    /// Root of the reference layout for an executable built by cargo, i.e.
    /// the directory holding `target/<profile>/<executable>`.
    pub fn reference_root(executable: &Path) -> Option<PathBuf> {
        executable.ancestors().nth(3).map(|p| p.to_path_buf())
    }

    pub fn validate(&self) -> CatdogResult<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(PipelineError::config(format!(
                "image dimensions must be positive, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        if self.input_tensor_name.is_empty() {
            return Err(PipelineError::config("input tensor name is empty"));
        }
        if self.output_tensor_name.is_empty() {
            return Err(PipelineError::config("output tensor name is empty"));
        }
        if self.pixels.scale == 0.0 || !self.pixels.scale.is_finite() {
            return Err(PipelineError::config(format!(
                "pixel scale must be finite and non-zero, got {}",
                self.pixels.scale
            )));
        }
        Ok(())
    }

    /// Pretty JSON rendering, for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{self:?} ({e})"))
    }
}
