//! Columnar record batches flowing between pipeline stages.
//!
//! A [`Frame`] is a list of equally long named columns. Stages read one
//! column and append another, so after a full pass a frame holds every
//! intermediate value (path, decoded image, resized image, pixels, scores).
//! A [`Schema`] is the type-level shadow of a frame and is what the pipeline
//! resolves when it is finalized, before any row is seen.

use std::fmt;

use image::DynamicImage;
use tract_core::prelude::*;

use crate::errors::{CatdogResult, PipelineError};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Text,
    /// Decoded image, with its dimensions when they are known ahead of time.
    Image { size: Option<(u32, u32)> },
    /// Shape is `None` when the model leaves some dimension symbolic.
    Tensor { datum_type: DatumType, shape: Option<Vec<usize>> },
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Image { size: Some((w, h)) } => write!(f, "image {w}x{h}"),
            ColumnType::Image { size: None } => write!(f, "image"),
            ColumnType::Tensor { datum_type, shape: Some(shape) } => {
                let dims = shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",");
                write!(f, "tensor {datum_type:?}[{dims}]")
            }
            ColumnType::Tensor { datum_type, shape: None } => write!(f, "tensor {datum_type:?}[?]"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
}

impl Schema {
    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Schema {
        self.set(name, ty);
        self
    }

    /// Add a column, shadowing any previous column with the same name.
    pub fn set(&mut self, name: impl Into<String>, ty: ColumnType) {
        let name = name.into();
        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = ty;
        } else {
            self.columns.push((name, ty));
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnType> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn require(&self, name: &str) -> CatdogResult<&ColumnType> {
        self.get(name).ok_or_else(|| {
            PipelineError::config(format!(
                "column {name:?} not found (available: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ix, (name, ty)) in self.columns.iter().enumerate() {
            if ix > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {ty}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Text(String),
    Image(DynamicImage),
    Tensor(Tensor),
}

impl Value {
    pub fn as_text(&self) -> CatdogResult<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn as_image(&self) -> CatdogResult<&DynamicImage> {
        match self {
            Value::Image(i) => Ok(i),
            other => Err(mismatch("image", other)),
        }
    }

    pub fn as_tensor(&self) -> CatdogResult<&Tensor> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(mismatch("tensor", other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Image(_) => "image",
            Value::Tensor(_) => "tensor",
        }
    }
}

fn mismatch(expected: &str, found: &Value) -> PipelineError {
    PipelineError::config(format!("expected a {expected} value, found a {}", found.kind()))
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<Column>,
    rows: usize,
}

impl Frame {
    /// A frame with a single text column.
    pub fn from_texts(name: impl Into<String>, texts: impl IntoIterator<Item = String>) -> Frame {
        let values: Vec<Value> = texts.into_iter().map(Value::Text).collect();
        Frame { rows: values.len(), columns: vec![Column { name: name.into(), values }] }
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> CatdogResult<&Column> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| {
            PipelineError::config(format!(
                "column {name:?} not found (available: {})",
                self.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Append a column, shadowing any previous column with the same name.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> CatdogResult<()> {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.rows {
            return Err(PipelineError::config(format!(
                "column {name:?} has {} rows, frame has {}",
                values.len(),
                self.rows
            )));
        }
        self.rows = values.len();
        self.columns.retain(|c| c.name != name);
        self.columns.push(Column { name, values });
        Ok(())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn texts(&self, name: &str) -> CatdogResult<Vec<&str>> {
        self.column(name)?.values.iter().map(|v| v.as_text()).collect()
    }

    pub fn tensors(&self, name: &str) -> CatdogResult<Vec<&Tensor>> {
        self.column(name)?.values.iter().map(|v| v.as_tensor()).collect()
    }

    /// Flattened f32 content of a tensor column, one vector per row.
    pub fn float_arrays(&self, name: &str) -> CatdogResult<Vec<Vec<f32>>> {
        self.tensors(name)?
            .into_iter()
            .map(|t| -> CatdogResult<Vec<f32>> {
                let t = t.cast_to::<f32>()?;
                Ok(t.as_slice::<f32>()?.to_vec())
            })
            .collect()
    }
}
