//! Field arrays exchanged between engines and the exchange file
//!
//! A field is a named, shaped block of values. Values are held as a flat
//! row-major `f64` buffer; the shape lists the length of every dimension.
//! A rank-0 field (empty shape) holds exactly one value.
//!
//! # Critical Invariants
//!
//! 1. `values.len()` always equals the product of `shape`
//! 2. Shape is fixed per field name; writes must not change it

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised when building a field array
#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("Shape {shape:?} holds {expected} values, got {actual}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Dimension length {0} is negative")]
    NegativeDimension(i64),
}

/// Element type reported by an engine for one of its variables
///
/// Mirrors the type strings of the BMI `get_var_type` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Double,
    Float,
    Int,
    Bool,
}

impl FieldType {
    /// BMI type name ("double", "float", "int", "bool")
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int => "int",
            FieldType::Bool => "bool",
        }
    }

    /// Parse a BMI type name. C-style aliases are accepted.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "double" | "f64" | "float64" => Some(FieldType::Double),
            "float" | "f32" | "float32" => Some(FieldType::Float),
            "int" | "i32" | "int32" | "long" | "i64" | "int64" => Some(FieldType::Int),
            "bool" => Some(FieldType::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shaped block of field values
///
/// # Example
///
/// ```rust
/// use dfwr_core_rs::FieldArray;
///
/// let bed = FieldArray::vector(vec![1.0, 2.0, 3.0]);
/// assert_eq!(bed.rank(), 1);
/// assert_eq!(bed.shape(), &[3]);
/// assert_eq!(bed.negated().values(), &[-1.0, -2.0, -3.0]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldArray {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl FieldArray {
    /// Create a field array, checking that `values` fills `shape` exactly
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self, FieldError> {
        let expected = element_count(&shape);
        if expected != values.len() {
            return Err(FieldError::LengthMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// One-dimensional field with `values.len()` elements
    pub fn vector(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// Rank-0 field holding a single value
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            values: vec![value],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Consume the array, returning its flat value buffer
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Copy with every element negated
    pub fn negated(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            values: self.values.iter().map(|v| -v).collect(),
        }
    }
}

/// Number of elements a shape holds (1 for rank 0)
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Shape from the signed dimension lengths a BMI `get_var_shape` reports
pub fn shape_from_dims(dims: &[i64]) -> Result<Vec<usize>, FieldError> {
    dims.iter()
        .map(|&d| usize::try_from(d).map_err(|_| FieldError::NegativeDimension(d)))
        .collect()
}
