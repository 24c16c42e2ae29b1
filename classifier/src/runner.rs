use crate::context::InferenceContext;
use crate::errors::{CatdogResult, PipelineError};
use crate::frame::{ColumnType, Frame, Schema};
use crate::pipeline::{self, IMAGE_PATH_COLUMN};
use crate::settings::Settings;

/// The two images scored by [`run`], looked up in the data location.
pub const REFERENCE_IMAGES: [&str; 2] = ["cat.jpeg", "dog.jpg"];

/// One image to score. The path is relative to the data location, or
/// absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub image_path: String,
}

impl ImageRecord {
    pub fn new(image_path: impl Into<String>) -> ImageRecord {
        ImageRecord { image_path: image_path.into() }
    }

    pub fn schema() -> Schema {
        Schema::default().with_column(IMAGE_PATH_COLUMN, ColumnType::Text)
    }

    pub fn frame(records: &[ImageRecord]) -> Frame {
        Frame::from_texts(IMAGE_PATH_COLUMN, records.iter().map(|r| r.image_path.clone()))
    }
}

/// Model output for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    /// Image path joined to the data location.
    pub image_path: String,
    /// Flattened output tensor.
    pub scores: Vec<f32>,
}

impl ScoreRow {
    /// First element of the output, the dog probability for the reference
    /// model.
    pub fn score(&self) -> CatdogResult<f32> {
        self.scores.first().copied().ok_or_else(|| {
            PipelineError::Runtime(tract_core::prelude::TractError::msg(format!(
                "model produced an empty output for {}",
                self.image_path
            )))
        })
    }
}

pub fn reference_records() -> Vec<ImageRecord> {
    REFERENCE_IMAGES.iter().map(|name| ImageRecord::new(*name)).collect()
}

/// Build, finalize and apply the pipeline to `records`, in one batch.
///
/// Rows come back in input order. Any failure fails the whole batch.
pub fn classify(
    context: &InferenceContext,
    settings: &Settings,
    records: &[ImageRecord],
) -> CatdogResult<Vec<ScoreRow>> {
    let pipeline = pipeline::build(context, settings)?;
    let compiled = pipeline.finalize(context, &ImageRecord::schema())?;
    let scored = compiled.transform(&ImageRecord::frame(records))?;
    let outputs = scored.float_arrays(&settings.output_tensor_name)?;
    log::info!("Scored {} image(s)", outputs.len());
    Ok(records
        .iter()
        .zip(outputs)
        .map(|(record, scores)| ScoreRow {
            image_path: settings
                .data_location
                .join(&record.image_path)
                .to_string_lossy()
                .into_owned(),
            scores,
        })
        .collect())
}

/// Score the reference cat and dog images.
pub fn run(context: &InferenceContext, settings: &Settings) -> CatdogResult<Vec<ScoreRow>> {
    classify(context, settings, &reference_records())
}
