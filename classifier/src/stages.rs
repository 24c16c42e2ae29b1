//! The four pipeline stages and the image operations behind them.
//!
//! Stages are plain descriptors: each one names the column it reads, the
//! column it writes and carries its own configuration. Decoding and
//! resampling are delegated to the `image` crate, model scoring to tract.

use std::fmt;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use serde::Serialize;
use tract_core::prelude::*;

use crate::errors::{CatdogResult, PipelineError};
use crate::frame::{ColumnType, Value};

/// Interpolation used by every resize mode.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// How an image is brought to the target dimensions. Whatever the mode, the
/// output is exactly the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ResizeMode {
    /// Stretch to the target, ignoring the aspect ratio.
    Fill,
    /// Scale preserving the aspect ratio until the target is covered, then
    /// crop the center.
    #[default]
    IsoCrop,
    /// Scale preserving the aspect ratio until the image fits, then center it
    /// on a black canvas.
    IsoPad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PixelLayout {
    /// `[1, height, width, 3]`, channels last.
    #[default]
    Interleaved,
    /// `[1, 3, height, width]`, channels first.
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Pixel to tensor conversion. Each channel value becomes
/// `(value - offset) * scale`; the defaults pass raw 0..255 values through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelExtraction {
    pub layout: PixelLayout,
    pub channel_order: ChannelOrder,
    pub offset: f32,
    pub scale: f32,
}

impl Default for PixelExtraction {
    fn default() -> PixelExtraction {
        PixelExtraction {
            layout: PixelLayout::default(),
            channel_order: ChannelOrder::default(),
            offset: 0.0,
            scale: 1.0,
        }
    }
}

impl PixelExtraction {
    pub fn shape(&self, width: u32, height: u32) -> Vec<usize> {
        let (w, h) = (width as usize, height as usize);
        match self.layout {
            PixelLayout::Interleaved => vec![1, h, w, 3],
            PixelLayout::Planar => vec![1, 3, h, w],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Load { input: String, output: String, folder: PathBuf },
    Resize { input: String, output: String, width: u32, height: u32, mode: ResizeMode },
    ExtractPixels { input: String, output: String, pixels: PixelExtraction },
    /// Column names double as the model tensor names.
    ScoreModel { input: String, output: String, model_location: PathBuf },
}

impl Stage {
    pub fn input(&self) -> &str {
        match self {
            Stage::Load { input, .. }
            | Stage::Resize { input, .. }
            | Stage::ExtractPixels { input, .. }
            | Stage::ScoreModel { input, .. } => input,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            Stage::Load { output, .. }
            | Stage::Resize { output, .. }
            | Stage::ExtractPixels { output, .. }
            | Stage::ScoreModel { output, .. } => output,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Load { .. } => "load",
            Stage::Resize { .. } => "resize",
            Stage::ExtractPixels { .. } => "extract-pixels",
            Stage::ScoreModel { .. } => "score-model",
        }
    }

    /// Type of the output column given the type of the input column.
    ///
    /// Returns `None` for the scoring stage: its output type comes from the
    /// model graph and is resolved when the pipeline is finalized.
    pub fn output_type(&self, input: &ColumnType) -> CatdogResult<Option<ColumnType>> {
        let ty = match (self, input) {
            (Stage::Load { .. }, ColumnType::Text) => ColumnType::Image { size: None },
            (Stage::Resize { width, height, .. }, ColumnType::Image { .. }) => {
                ColumnType::Image { size: Some((*width, *height)) }
            }
            (Stage::ExtractPixels { pixels, .. }, ColumnType::Image { size: Some((w, h)) }) => {
                ColumnType::Tensor {
                    datum_type: f32::datum_type(),
                    shape: Some(pixels.shape(*w, *h)),
                }
            }
            (Stage::ExtractPixels { input: column, .. }, ColumnType::Image { size: None }) => {
                return Err(PipelineError::config(format!(
                    "pixels can not be extracted from {column:?}: image size is unknown, resize it first"
                )));
            }
            (Stage::ScoreModel { .. }, ColumnType::Tensor { .. }) => return Ok(None),
            (stage, ty) => {
                return Err(PipelineError::config(format!(
                    "{} stage can not read column {:?} of type {ty}",
                    stage.name(),
                    stage.input()
                )));
            }
        };
        Ok(Some(ty))
    }

    /// Run a preprocessing stage on one value. The scoring stage needs a
    /// bound model and is run by the compiled pipeline instead.
    pub fn apply(&self, value: &Value) -> CatdogResult<Value> {
        match self {
            Stage::Load { folder, .. } => Ok(Value::Image(load_image(folder, value.as_text()?)?)),
            Stage::Resize { width, height, mode, .. } => {
                Ok(Value::Image(resize(value.as_image()?, *width, *height, *mode)))
            }
            Stage::ExtractPixels { pixels, .. } => {
                Ok(Value::Tensor(extract_pixels(value.as_image()?, pixels)))
            }
            Stage::ScoreModel { .. } => {
                Err(PipelineError::config("model scoring can only run in a finalized pipeline"))
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?} -> {:?})", self.name(), self.input(), self.output())?;
        match self {
            Stage::Load { folder, .. } => write!(f, " from {folder:?}"),
            Stage::Resize { width, height, mode, .. } => write!(f, " {width}x{height} {mode:?}"),
            Stage::ExtractPixels { pixels, .. } => {
                write!(f, " {:?} {:?}", pixels.layout, pixels.channel_order)
            }
            Stage::ScoreModel { model_location, .. } => write!(f, " with {model_location:?}"),
        }
    }
}

/// Read and decode `path`, relative to `folder` unless it is absolute.
pub fn load_image(folder: &Path, path: &str) -> CatdogResult<DynamicImage> {
    let full = folder.join(path);
    let bytes = fs_err::read(&full).map_err(|e| PipelineError::io(&full, e))?;
    let image = image::load_from_memory(&bytes).map_err(|e| PipelineError::image(&full, e))?;
    log::trace!("decoded {:?} ({}x{})", full, image.width(), image.height());
    Ok(image)
}

pub fn resize(image: &DynamicImage, width: u32, height: u32, mode: ResizeMode) -> DynamicImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    match mode {
        ResizeMode::Fill => image.resize_exact(width, height, RESIZE_FILTER),
        ResizeMode::IsoCrop => {
            let (iw, ih) = image.dimensions();
            let ratio = f64::max(width as f64 / iw as f64, height as f64 / ih as f64);
            let sw = ((iw as f64 * ratio).ceil() as u32).max(width);
            let sh = ((ih as f64 * ratio).ceil() as u32).max(height);
            let scaled = image.resize_exact(sw, sh, RESIZE_FILTER);
            scaled.crop_imm((sw - width) / 2, (sh - height) / 2, width, height)
        }
        ResizeMode::IsoPad => {
            let (iw, ih) = image.dimensions();
            let ratio = f64::min(width as f64 / iw as f64, height as f64 / ih as f64);
            let sw = ((iw as f64 * ratio).round() as u32).clamp(1, width);
            let sh = ((ih as f64 * ratio).round() as u32).clamp(1, height);
            let scaled = image.resize_exact(sw, sh, RESIZE_FILTER).to_rgb8();
            let mut canvas = RgbImage::new(width, height);
            image::imageops::overlay(
                &mut canvas,
                &scaled,
                ((width - sw) / 2) as i64,
                ((height - sh) / 2) as i64,
            );
            DynamicImage::ImageRgb8(canvas)
        }
    }
}

pub fn extract_pixels(image: &DynamicImage, pixels: &PixelExtraction) -> Tensor {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();
    let (w, h) = (w as usize, h as usize);
    let value = |x: usize, y: usize, c: usize| {
        let c = match pixels.channel_order {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => 2 - c,
        };
        (rgb[(x as u32, y as u32)][c] as f32 - pixels.offset) * pixels.scale
    };
    match pixels.layout {
        PixelLayout::Interleaved => {
            tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| value(x, y, c))
                .into()
        }
        PixelLayout::Planar => {
            tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| value(x, y, c))
                .into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use image::Rgb;
    use proptest::prelude::*;

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn resize_is_deterministic() {
        let image = gradient(317, 211);
        for mode in [ResizeMode::Fill, ResizeMode::IsoCrop, ResizeMode::IsoPad] {
            let a = resize(&image, 180, 180, mode);
            let b = resize(&image, 180, 180, mode);
            assert_eq!(a.as_bytes(), b.as_bytes(), "{mode:?}");
        }
    }

    #[test]
    fn resize_keeps_correctly_sized_images() {
        let image = gradient(180, 180);
        let resized = resize(&image, 180, 180, ResizeMode::IsoCrop);
        assert_eq!(resized.as_bytes(), image.as_bytes());
    }

    #[test]
    fn iso_pad_leaves_black_borders() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 10, Rgb([255, 255, 255])));
        let padded = resize(&white, 20, 20, ResizeMode::IsoPad).to_rgb8();
        assert_eq!(padded.dimensions(), (20, 20));
        assert_eq!(padded[(10, 0)], Rgb([0, 0, 0]));
        assert_eq!(padded[(10, 10)], Rgb([255, 255, 255]));
    }

    proptest! {
        #[test]
        fn resize_hits_exact_dimensions(
            iw in 1u32..200, ih in 1u32..200, w in 1u32..64, h in 1u32..64,
            mode in prop_oneof![Just(ResizeMode::Fill), Just(ResizeMode::IsoCrop), Just(ResizeMode::IsoPad)],
        ) {
            let image = DynamicImage::ImageRgb8(RgbImage::new(iw, ih));
            prop_assert_eq!(resize(&image, w, h, mode).dimensions(), (w, h));
        }
    }

    #[test]
    fn extract_interleaved_rgb() -> TractResult<()> {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));
        let t = extract_pixels(&DynamicImage::ImageRgb8(img), &PixelExtraction::default());
        assert_eq!(t.shape(), &[1, 1, 2, 3]);
        assert_eq!(t.as_slice::<f32>()?, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        Ok(())
    }

    #[test]
    fn extract_planar_bgr_scaled() -> TractResult<()> {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));
        let pixels = PixelExtraction {
            layout: PixelLayout::Planar,
            channel_order: ChannelOrder::Bgr,
            offset: 1.0,
            scale: 2.0,
        };
        let t = extract_pixels(&DynamicImage::ImageRgb8(img), &pixels);
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t.as_slice::<f32>()?, &[4.0, 10.0, 2.0, 8.0, 0.0, 6.0]);
        Ok(())
    }

    #[test]
    fn schema_propagation() -> CatdogResult<()> {
        let load =
            Stage::Load { input: "p".into(), output: "o".into(), folder: PathBuf::from(".") };
        let resize = Stage::Resize {
            input: "o".into(),
            output: "r".into(),
            width: 4,
            height: 3,
            mode: ResizeMode::Fill,
        };
        let extract =
            Stage::ExtractPixels { input: "r".into(), output: "x".into(), pixels: Default::default() };
        let loaded = load.output_type(&ColumnType::Text)?.unwrap();
        assert_eq!(loaded, ColumnType::Image { size: None });
        let e = extract.output_type(&loaded).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
        let resized = resize.output_type(&loaded)?.unwrap();
        assert_eq!(
            extract.output_type(&resized)?.unwrap(),
            ColumnType::Tensor { datum_type: f32::datum_type(), shape: Some(vec![1, 3, 4, 3]) }
        );
        assert!(resize.output_type(&ColumnType::Text).is_err());
        Ok(())
    }

    #[test]
    fn load_missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let e = load_image(dir.path(), "cat.jpeg").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn load_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dog.jpg"), b"definitely not a jpeg").unwrap();
        let e = load_image(dir.path(), "dog.jpg").unwrap_err();
        assert!(matches!(e, PipelineError::ImageDecode { .. }), "{e:?}");
    }

    #[test]
    fn load_roundtrips_through_jpeg() -> CatdogResult<()> {
        let dir = tempfile::tempdir().unwrap();
        gradient(32, 24).save(dir.path().join("cat.jpeg")).unwrap();
        let abs = dir.path().join("cat.jpeg");
        let image = load_image(Path::new("/nonexistent"), abs.to_str().unwrap())?;
        assert_eq!(image.dimensions(), (32, 24));
        Ok(())
    }
}
