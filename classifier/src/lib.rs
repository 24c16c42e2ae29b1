//! # catdog-classifier
//!
//! Score images with a pre-trained binary image classifier (the Keras cat/dog
//! model), running it with tract.
//!
//! ## Example
//!
//! ```no_run
//! use catdog_classifier::*;
//!
//! let context = InferenceContext::new();
//! let settings = Settings::reference("/path/to/catdog");
//! let rows = run(&context, &settings)?;
//! for line in report_rows(&rows)? {
//!     println!("{line}");
//! }
//! # Ok::<(), PipelineError>(())
//! ```

pub mod context;
pub mod errors;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod settings;
pub mod stages;

pub use context::InferenceContext;
pub use errors::{CatdogResult, ErrorKind, PipelineError};
pub use pipeline::{CompiledPipeline, Pipeline, build};
pub use report::{Percentages, report, report_rows};
pub use runner::{ImageRecord, ScoreRow, classify, run};
pub use settings::Settings;
