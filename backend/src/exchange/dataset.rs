//! In-memory form of the exchange file
//!
//! A dataset mirrors the classic array-container layout: dataset-level
//! attributes, named dimensions, and an ordered list of variables, each
//! with its own dimensions, attributes and flat row-major values.
//!
//! Values keep their stored element type. A rewrite that replaces one
//! field must hand every other variable and attribute back to the codec
//! exactly as it was read, integer and character data included.

use crate::models::{element_count, FieldArray};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Format variant every rewrite is stored in
pub const LEGACY_FORMAT: &str = "classic";

/// Format variant of files using 64-bit offsets
pub const OFFSET64_FORMAT: &str = "64bit_offset";

/// Attribute some engines refuse to re-serialize; dropped on every rewrite
pub const COORDINATES_ATTRIBUTE: &str = "coordinates";

fn default_format() -> String {
    LEGACY_FORMAT.to_string()
}

/// Attribute table, in file order
pub type Attributes = IndexMap<String, Values>;

// ============================================================================
// Typed values
// ============================================================================

/// Flat buffer tagged with its classic element type
///
/// Used for both variable data and attribute values. Text attributes are
/// `Char` buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Values {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Values {
    /// Text stored as a character buffer
    pub fn text(s: &str) -> Self {
        Values::Char(s.as_bytes().to_vec())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Values::Byte(_) => "byte",
            Values::Char(_) => "char",
            Values::Short(_) => "short",
            Values::Int(_) => "int",
            Values::Float(_) => "float",
            Values::Double(_) => "double",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Byte(v) => v.len(),
            Values::Char(v) => v.len(),
            Values::Short(v) => v.len(),
            Values::Int(v) => v.len(),
            Values::Float(v) => v.len(),
            Values::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Character buffer as text, `None` for numeric buffers
    pub fn as_text(&self) -> Option<String> {
        match self {
            Values::Char(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// Widened copy of the numeric content
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Values::Byte(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Char(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Short(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Int(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Float(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Double(v) => v.clone(),
        }
    }

    /// `values` stored with this buffer's element type
    ///
    /// Only floating-point buffers accept replacement; `None` for the
    /// integer and character types.
    pub fn with_replacement(&self, values: &[f64]) -> Option<Values> {
        match self {
            Values::Double(_) => Some(Values::Double(values.to_vec())),
            Values::Float(_) => Some(Values::Float(values.iter().map(|&x| x as f32).collect())),
            _ => None,
        }
    }

    /// True when any floating-point element is NaN or infinite
    pub fn has_non_finite(&self) -> bool {
        match self {
            Values::Float(v) => v.iter().any(|x| !x.is_finite()),
            Values::Double(v) => v.iter().any(|x| !x.is_finite()),
            _ => false,
        }
    }
}

impl From<&str> for Values {
    fn from(s: &str) -> Self {
        Values::text(s)
    }
}

impl From<Vec<f64>> for Values {
    fn from(v: Vec<f64>) -> Self {
        Values::Double(v)
    }
}

impl From<Vec<f32>> for Values {
    fn from(v: Vec<f32>) -> Self {
        Values::Float(v)
    }
}

impl From<Vec<i32>> for Values {
    fn from(v: Vec<i32>) -> Self {
        Values::Int(v)
    }
}

// ============================================================================
// Dataset layout
// ============================================================================

/// Named dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,

    /// Record dimension; `len` is the current record count
    #[serde(default)]
    pub unlimited: bool,
}

/// Named variable with attributes and values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,

    /// Dimension names, outermost first; empty for scalars
    #[serde(default)]
    pub dimensions: Vec<String>,

    #[serde(default)]
    pub attributes: Attributes,

    pub values: Values,
}

/// Complete exchange-file content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Format variant the file was written in
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub attributes: Attributes,

    #[serde(default)]
    pub dimensions: Vec<Dimension>,

    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl Default for Dataset {
    fn default() -> Self {
        Self {
            format: default_format(),
            attributes: Attributes::new(),
            dimensions: Vec::new(),
            variables: Vec::new(),
        }
    }
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a fixed-length dimension
    pub fn with_dimension(mut self, name: impl Into<String>, len: usize) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            len,
            unlimited: false,
        });
        self
    }

    /// Builder: add the record dimension holding `records` entries
    pub fn with_record_dimension(mut self, name: impl Into<String>, records: usize) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            len: records,
            unlimited: true,
        });
        self
    }

    /// Builder: add a variable over existing dimensions
    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        dimensions: &[&str],
        values: impl Into<Values>,
    ) -> Self {
        self.variables.push(Variable {
            name: name.into(),
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            attributes: Attributes::new(),
            values: values.into(),
        });
        self
    }

    /// Builder: set an attribute on the most recently added variable
    pub fn with_variable_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<Values>,
    ) -> Self {
        if let Some(var) = self.variables.last_mut() {
            var.attributes.insert(key.into(), value.into());
        }
        self
    }

    /// Builder: set a dataset-level attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Values>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn dimension_len(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().find(|d| d.name == name).map(|d| d.len)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// Shape of a variable, resolved through the dimension table
    pub fn shape_of(&self, var: &Variable) -> Result<Vec<usize>, String> {
        var.dimensions
            .iter()
            .map(|d| {
                self.dimension_len(d).ok_or_else(|| {
                    format!("variable '{}' uses undeclared dimension '{}'", var.name, d)
                })
            })
            .collect()
    }

    /// Copy of a variable's values as a shaped `f64` field
    pub fn field(&self, name: &str) -> Option<Result<FieldArray, String>> {
        let var = self.variable(name)?;
        Some(self.shape_of(var).and_then(|shape| {
            FieldArray::new(shape, var.values.to_f64()).map_err(|e| e.to_string())
        }))
    }

    /// Remove `key` from every variable's attributes; returns how many were
    /// removed
    pub fn strip_variable_attribute(&mut self, key: &str) -> usize {
        self.variables
            .iter_mut()
            .filter_map(|v| v.attributes.shift_remove(key))
            .count()
    }

    /// Name of the first variable or attribute holding NaN or infinity
    pub fn first_non_finite(&self) -> Option<String> {
        let in_attrs = |attrs: &Attributes, owner: &str| {
            attrs
                .iter()
                .find(|(_, v)| v.has_non_finite())
                .map(|(k, _)| format!("{}:{}", owner, k))
        };
        in_attrs(&self.attributes, "").or_else(|| {
            self.variables.iter().find_map(|var| {
                if var.values.has_non_finite() {
                    Some(var.name.clone())
                } else {
                    in_attrs(&var.attributes, &var.name)
                }
            })
        })
    }

    /// Structural checks: unique variable names and value buffers that
    /// match their declared dimensions
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for var in &self.variables {
            if !seen.insert(var.name.as_str()) {
                return Err(format!("duplicate variable '{}'", var.name));
            }
            let shape = self.shape_of(var)?;
            let expected = element_count(&shape);
            if expected != var.values.len() {
                return Err(format!(
                    "variable '{}' declares {} values, holds {}",
                    var.name,
                    expected,
                    var.values.len()
                ));
            }
        }
        Ok(())
    }
}
