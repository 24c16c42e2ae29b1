//! Error taxonomy of the classification pipeline.
//!
//! Every failure belongs to one of three kinds: a configuration problem
//! (settings, tensor names, model format), an I/O problem (missing or
//! unreadable model and image files) or an inference runtime failure.
//! Nothing is recovered: errors propagate to the process boundary.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tract_core::prelude::TractError;

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Io,
    Runtime,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Io => write!(f, "io error"),
            ErrorKind::Runtime => write!(f, "runtime error"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Settings, column wiring or model graph do not fit together.
    #[error("configuration: {message}")]
    Configuration { message: String },

    /// A file or directory could not be accessed.
    #[error("can not access {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image file was read but could not be decoded.
    #[error("can not decode image {path:?}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The inference runtime failed while optimizing or running the model.
    #[error("inference runtime: {0}")]
    Runtime(#[source] TractError),
}

pub type CatdogResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration { .. } => ErrorKind::Configuration,
            PipelineError::Io { .. } | PipelineError::ImageDecode { .. } => ErrorKind::Io,
            PipelineError::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Configuration { message: message.into() }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.as_ref().to_path_buf(), source }
    }

    /// Sort an image crate failure: file access problems stay I/O errors
    /// with the path attached, everything else is a decode failure.
    pub fn image(path: impl AsRef<Path>, source: image::ImageError) -> Self {
        match source {
            image::ImageError::IoError(e) => PipelineError::io(path, e),
            other => PipelineError::ImageDecode { path: path.as_ref().to_path_buf(), source: other },
        }
    }
}

impl From<TractError> for PipelineError {
    fn from(e: TractError) -> Self {
        PipelineError::Runtime(e)
    }
}
