//! Pipeline assembly, finalization and execution.
//!
//! Building a pipeline only wires stage descriptors together: no file is
//! touched. Finalizing resolves the column types stage by stage against an
//! input schema, loads and binds the model, and yields a [`CompiledPipeline`]
//! that can transform any number of record batches.

use tract_core::prelude::*;

use crate::context::InferenceContext;
use crate::errors::{CatdogResult, PipelineError};
use crate::frame::{ColumnType, Frame, Schema, Value};
use crate::model;
use crate::settings::Settings;
use crate::stages::Stage;

pub const IMAGE_PATH_COLUMN: &str = "ImagePath";
pub const ORIGINAL_IMAGE_COLUMN: &str = "originalImage";
pub const RESIZED_IMAGE_COLUMN: &str = "resizedImage";

/// An ordered, not yet executable chain of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Assemble the load, resize, extract-pixels and score-model chain described
/// by `settings`.
pub fn build(context: &InferenceContext, settings: &Settings) -> CatdogResult<Pipeline> {
    settings.validate()?;
    log::debug!("Building pipeline with {context:?} for settings {}", settings.to_json());
    let pipeline = Pipeline::default()
        .then(Stage::Load {
            input: IMAGE_PATH_COLUMN.to_string(),
            output: ORIGINAL_IMAGE_COLUMN.to_string(),
            folder: settings.data_location.clone(),
        })
        .then(Stage::Resize {
            input: ORIGINAL_IMAGE_COLUMN.to_string(),
            output: RESIZED_IMAGE_COLUMN.to_string(),
            width: settings.image_width,
            height: settings.image_height,
            mode: settings.resize_mode,
        })
        .then(Stage::ExtractPixels {
            input: RESIZED_IMAGE_COLUMN.to_string(),
            output: settings.input_tensor_name.clone(),
            pixels: settings.pixels,
        })
        .then(Stage::ScoreModel {
            input: settings.input_tensor_name.clone(),
            output: settings.output_tensor_name.clone(),
            model_location: settings.model_location.clone(),
        });
    Ok(pipeline)
}

impl Pipeline {
    /// Append a stage.
    pub fn then(mut self, stage: Stage) -> Pipeline {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Resolve every column type against `input` and bind the model.
    ///
    /// Nothing is learned here: the records behind `input` are not needed,
    /// only their schema. Unknown columns, mismatched column types and tensor
    /// names missing from the model graph are configuration errors.
    pub fn finalize(
        &self,
        context: &InferenceContext,
        input: &Schema,
    ) -> CatdogResult<CompiledPipeline> {
        let mut schema = input.clone();
        let mut plan = None;
        for stage in &self.stages {
            let input_type = schema.require(stage.input())?.clone();
            let output_type = match stage {
                Stage::ScoreModel { input: tensor_in, output: tensor_out, model_location } => {
                    stage.output_type(&input_type)?;
                    let ColumnType::Tensor { shape: Some(shape), .. } = &input_type else {
                        return Err(PipelineError::config(format!(
                            "model input column {tensor_in:?} must have a known shape, got {input_type}"
                        )));
                    };
                    if plan.is_some() {
                        return Err(PipelineError::config("a pipeline can score with one model only"));
                    }
                    let (path, format) = model::discover(model_location)?;
                    let loaded = context.load(format, &path)?;
                    let optimized = model::prepare(loaded, tensor_in, tensor_out, shape)?;
                    let fact = optimized.output_fact(0)?;
                    let output_type = ColumnType::Tensor {
                        datum_type: fact.datum_type,
                        shape: fact.shape.as_concrete().map(|s| s.to_vec()),
                    };
                    plan = Some(SimplePlan::new(optimized)?);
                    output_type
                }
                _ => stage.output_type(&input_type)?.ok_or_else(|| {
                    PipelineError::config(format!("{} stage has no output type", stage.name()))
                })?,
            };
            log::debug!("{stage}: {input_type} -> {output_type}");
            schema.set(stage.output(), output_type);
        }
        log::info!("Pipeline finalized, output schema: {schema}");
        Ok(CompiledPipeline {
            stages: self.stages.clone(),
            plan,
            input_schema: input.clone(),
            output_schema: schema,
        })
    }
}

/// A finalized pipeline. It holds no mutable state and can be reused.
pub struct CompiledPipeline {
    stages: Vec<Stage>,
    plan: Option<TypedSimplePlan<TypedModel>>,
    input_schema: Schema,
    output_schema: Schema,
}

impl std::fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPipeline")
            .field("stages", &self.stages)
            .field("bound_model", &self.plan.is_some())
            .field("output_schema", &self.output_schema)
            .finish()
    }
}

impl CompiledPipeline {
    pub fn input_schema(&self) -> &Schema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    /// Run every stage over every row of `records`.
    ///
    /// The whole batch succeeds or fails: the first failing row aborts the
    /// call and no partial frame is returned.
    pub fn transform(&self, records: &Frame) -> CatdogResult<Frame> {
        for name in self.input_schema.names() {
            records.column(name)?;
        }
        let mut frame = records.clone();
        for stage in &self.stages {
            let values = frame
                .column(stage.input())?
                .values
                .iter()
                .enumerate()
                .map(|(row, value)| {
                    log::trace!("{} on row {row}", stage.name());
                    self.apply(stage, value)
                })
                .collect::<CatdogResult<Vec<Value>>>()?;
            frame.push_column(stage.output(), values)?;
        }
        Ok(frame)
    }

    fn apply(&self, stage: &Stage, value: &Value) -> CatdogResult<Value> {
        match stage {
            Stage::ScoreModel { .. } => {
                let plan = self.plan.as_ref().ok_or_else(|| {
                    PipelineError::config("model stage was not bound at finalization")
                })?;
                let input = value.as_tensor()?.clone();
                let mut outputs = plan.run(tvec!(input.into()))?;
                Ok(Value::Tensor(outputs.remove(0).into_tensor()))
            }
            _ => stage.apply(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::stages::ResizeMode;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::path::Path;

    fn input_schema() -> Schema {
        Schema::default().with_column(IMAGE_PATH_COLUMN, ColumnType::Text)
    }

    fn preprocessing(folder: &Path) -> Pipeline {
        Pipeline::default()
            .then(Stage::Load {
                input: IMAGE_PATH_COLUMN.into(),
                output: ORIGINAL_IMAGE_COLUMN.into(),
                folder: folder.to_path_buf(),
            })
            .then(Stage::Resize {
                input: ORIGINAL_IMAGE_COLUMN.into(),
                output: RESIZED_IMAGE_COLUMN.into(),
                width: 16,
                height: 12,
                mode: ResizeMode::IsoCrop,
            })
            .then(Stage::ExtractPixels {
                input: RESIZED_IMAGE_COLUMN.into(),
                output: "pixels".into(),
                pixels: Default::default(),
            })
    }

    #[test]
    fn build_wires_columns_in_order() -> CatdogResult<()> {
        let settings = Settings::reference("/models");
        let pipeline = build(&InferenceContext::new(), &settings)?;
        let wiring: Vec<(&str, &str, &str)> =
            pipeline.stages().iter().map(|s| (s.name(), s.input(), s.output())).collect();
        assert_eq!(
            wiring,
            vec![
                ("load", "ImagePath", "originalImage"),
                ("resize", "originalImage", "resizedImage"),
                ("extract-pixels", "resizedImage", "serving_default_input_1"),
                ("score-model", "serving_default_input_1", "StatefulPartitionedCall"),
            ]
        );
        Ok(())
    }

    #[test]
    fn build_rejects_bad_dimensions() {
        let mut settings = Settings::reference("/models");
        settings.image_height = 0;
        let e = build(&InferenceContext::new(), &settings).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn finalize_without_path_column() {
        let pipeline = preprocessing(Path::new("."));
        let e = pipeline.finalize(&InferenceContext::new(), &Schema::default()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn finalize_with_missing_model_is_io() -> CatdogResult<()> {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::reference(dir.path());
        let context = InferenceContext::new();
        let e = build(&context, &settings)?.finalize(&context, &input_schema()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);
        Ok(())
    }

    #[test]
    fn preprocessing_schema_and_rows() -> CatdogResult<()> {
        let dir = tempfile::tempdir().unwrap();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([10, 20, 30])))
            .save(dir.path().join("a.png"))
            .unwrap();
        let context = InferenceContext::new();
        let compiled = preprocessing(dir.path()).finalize(&context, &input_schema())?;
        assert_eq!(
            compiled.output_schema().get("pixels"),
            Some(&ColumnType::Tensor { datum_type: f32::datum_type(), shape: Some(vec![1, 12, 16, 3]) })
        );
        let records = Frame::from_texts(IMAGE_PATH_COLUMN, vec!["a.png".to_string()]);
        let frame = compiled.transform(&records)?;
        assert_eq!(frame.len(), 1);
        let pixels = frame.tensors("pixels")?;
        assert_eq!(pixels[0].shape(), &[1, 12, 16, 3]);
        assert_eq!(&pixels[0].as_slice::<f32>()?[0..3], &[10.0, 20.0, 30.0]);
        Ok(())
    }

    #[test]
    fn transform_is_all_or_nothing() -> CatdogResult<()> {
        let dir = tempfile::tempdir().unwrap();
        DynamicImage::ImageRgb8(RgbImage::new(8, 8)).save(dir.path().join("ok.png")).unwrap();
        let compiled = preprocessing(dir.path()).finalize(&InferenceContext::new(), &input_schema())?;
        let records = Frame::from_texts(
            IMAGE_PATH_COLUMN,
            vec!["ok.png".to_string(), "missing.png".to_string()],
        );
        assert_eq!(compiled.transform(&records).unwrap_err().kind(), ErrorKind::Io);
        Ok(())
    }

    #[test]
    fn compiled_pipeline_is_reusable_and_deterministic() -> CatdogResult<()> {
        let dir = tempfile::tempdir().unwrap();
        DynamicImage::ImageRgb8(RgbImage::from_fn(33, 17, |x, y| Rgb([x as u8, y as u8, 7])))
            .save(dir.path().join("g.png"))
            .unwrap();
        let compiled = preprocessing(dir.path()).finalize(&InferenceContext::new(), &input_schema())?;
        let records = Frame::from_texts(IMAGE_PATH_COLUMN, vec!["g.png".to_string()]);
        let a = compiled.transform(&records)?;
        let b = compiled.transform(&records)?;
        assert_eq!(a.float_arrays("pixels")?, b.float_arrays("pixels")?);
        Ok(())
    }
}
