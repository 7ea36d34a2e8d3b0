//! On-disk encoding of the exchange file
//!
//! The channel only reads and rewrites whole datasets, so the on-disk
//! format is a codec choice:
//!
//! - `NetcdfCodec`: the classic NetCDF binary layout the engines write
//!   (`*_com.nc`). Default for every channel and orchestrator.
//! - `JsonCodec`: a pretty-printed JSON document, handy for fixtures and
//!   inspection. JSON has no NaN or infinity, so datasets holding them are
//!   refused instead of being written as `null`.
//!
//! Codecs work on paths. The channel hands them a temporary sibling path
//! and renames it over the original once the codec returns.

use super::dataset::{
    Attributes, Dataset, Dimension, Values, Variable, LEGACY_FORMAT, OFFSET64_FORMAT,
};
use netcdf3::{DataSet, DataType, DataVector, FileReader, FileWriter, Version};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Read/write a complete dataset
pub trait DatasetCodec: Send + Sync + std::fmt::Debug {
    fn read(&self, path: &Path) -> Result<Dataset, CodecError>;

    /// Write `dataset` to a new file at `path`
    fn write(&self, path: &Path, dataset: &Dataset) -> Result<(), CodecError>;
}

// ============================================================================
// JSON
// ============================================================================

/// Pretty-printed JSON snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl DatasetCodec for JsonCodec {
    fn read(&self, path: &Path) -> Result<Dataset, CodecError> {
        let bytes = fs::read(path).map_err(|e| CodecError(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError(format!("invalid dataset: {}", e)))
    }

    fn write(&self, path: &Path, dataset: &Dataset) -> Result<(), CodecError> {
        if let Some(name) = dataset.first_non_finite() {
            return Err(CodecError(format!(
                "'{}' holds NaN or infinity, which JSON cannot represent",
                name
            )));
        }
        let bytes = serde_json::to_vec_pretty(dataset)
            .map_err(|e| CodecError(format!("dataset serialization failed: {}", e)))?;
        fs::write(path, bytes).map_err(|e| CodecError(e.to_string()))
    }
}

// ============================================================================
// NetCDF classic
// ============================================================================

/// Classic NetCDF binary file
#[derive(Debug, Clone, Copy, Default)]
pub struct NetcdfCodec;

impl DatasetCodec for NetcdfCodec {
    fn read(&self, path: &Path) -> Result<Dataset, CodecError> {
        let mut reader = FileReader::open(path).map_err(invalid)?;

        let format = match reader.version() {
            Version::Classic => LEGACY_FORMAT,
            Version::Offset64Bit => OFFSET64_FORMAT,
        };

        // Layout first; values are read once the header borrow ends
        let (attributes, dimensions, layout) = {
            let def = reader.data_set();
            let attributes: Attributes = def
                .get_global_attrs()
                .into_iter()
                .map(|attr| (attr.name().to_string(), attribute_values(attr)))
                .collect();
            let dimensions: Vec<Dimension> = def
                .get_dims()
                .iter()
                .map(|d| Dimension {
                    name: d.name().to_string(),
                    len: d.size(),
                    unlimited: d.is_unlimited(),
                })
                .collect();
            let layout: Vec<(String, Vec<String>, Attributes)> = def
                .get_vars()
                .into_iter()
                .map(|var| {
                    let attrs: Attributes = var
                        .get_attrs()
                        .into_iter()
                        .map(|attr| (attr.name().to_string(), attribute_values(attr)))
                        .collect();
                    (var.name().to_string(), var.dim_names(), attrs)
                })
                .collect();
            (attributes, dimensions, layout)
        };

        let mut variables = Vec::with_capacity(layout.len());
        for (name, dims, attrs) in layout {
            let data = reader
                .read_var(&name)
                .map_err(|e| CodecError(format!("failed to read '{}': {:?}", name, e)))?;
            variables.push(Variable {
                name,
                dimensions: dims,
                attributes: attrs,
                values: vector_values(data),
            });
        }

        Ok(Dataset {
            format: format.to_string(),
            attributes,
            dimensions,
            variables,
        })
    }

    fn write(&self, path: &Path, dataset: &Dataset) -> Result<(), CodecError> {
        let version = match dataset.format.as_str() {
            LEGACY_FORMAT => Version::Classic,
            OFFSET64_FORMAT => Version::Offset64Bit,
            other => {
                return Err(CodecError(format!(
                    "format '{}' has no classic NetCDF encoding",
                    other
                )))
            }
        };
        let def = definition(dataset)?;

        let mut writer = FileWriter::open(path)
            .map_err(|e| CodecError(format!("cannot create {}: {:?}", path.display(), e)))?;
        writer
            .set_def(&def, version, 0)
            .map_err(|e| CodecError(format!("invalid header: {:?}", e)))?;
        for var in &dataset.variables {
            let name = var.name.as_str();
            match &var.values {
                Values::Byte(v) => writer.write_var_i8(name, v),
                Values::Char(v) => writer.write_var_u8(name, v),
                Values::Short(v) => writer.write_var_i16(name, v),
                Values::Int(v) => writer.write_var_i32(name, v),
                Values::Float(v) => writer.write_var_f32(name, v),
                Values::Double(v) => writer.write_var_f64(name, v),
            }
            .map_err(|e| CodecError(format!("failed to write '{}': {:?}", name, e)))?;
        }
        writer
            .close()
            .map_err(|e| CodecError(format!("failed to finish file: {:?}", e)))
    }
}

fn invalid(e: impl std::fmt::Debug) -> CodecError {
    CodecError(format!("invalid dataset: {:?}", e))
}

/// Header definition for `dataset`
fn definition(dataset: &Dataset) -> Result<DataSet, CodecError> {
    let mut def = DataSet::new();
    for dim in &dataset.dimensions {
        if dim.unlimited {
            def.set_unlimited_dim(dim.name.as_str(), dim.len)
        } else {
            def.add_fixed_dim(dim.name.as_str(), dim.len)
        }
        .map_err(invalid)?;
    }

    for (key, value) in &dataset.attributes {
        let key = key.as_str();
        match value.clone() {
            Values::Byte(v) => def.add_global_attr_i8(key, v),
            Values::Char(v) => def.add_global_attr_u8(key, v),
            Values::Short(v) => def.add_global_attr_i16(key, v),
            Values::Int(v) => def.add_global_attr_i32(key, v),
            Values::Float(v) => def.add_global_attr_f32(key, v),
            Values::Double(v) => def.add_global_attr_f64(key, v),
        }
        .map_err(invalid)?;
    }

    for var in &dataset.variables {
        let name = var.name.as_str();
        let dims: Vec<&str> = var.dimensions.iter().map(String::as_str).collect();
        def.add_var(name, &dims, data_type(&var.values))
            .map_err(invalid)?;
        for (key, value) in &var.attributes {
            let key = key.as_str();
            match value.clone() {
                Values::Byte(v) => def.add_var_attr_i8(name, key, v),
                Values::Char(v) => def.add_var_attr_u8(name, key, v),
                Values::Short(v) => def.add_var_attr_i16(name, key, v),
                Values::Int(v) => def.add_var_attr_i32(name, key, v),
                Values::Float(v) => def.add_var_attr_f32(name, key, v),
                Values::Double(v) => def.add_var_attr_f64(name, key, v),
            }
            .map_err(invalid)?;
        }
    }
    Ok(def)
}

fn data_type(values: &Values) -> DataType {
    match values {
        Values::Byte(_) => DataType::I8,
        Values::Char(_) => DataType::U8,
        Values::Short(_) => DataType::I16,
        Values::Int(_) => DataType::I32,
        Values::Float(_) => DataType::F32,
        Values::Double(_) => DataType::F64,
    }
}

fn vector_values(data: DataVector) -> Values {
    match data {
        DataVector::I8(v) => Values::Byte(v),
        DataVector::U8(v) => Values::Char(v),
        DataVector::I16(v) => Values::Short(v),
        DataVector::I32(v) => Values::Int(v),
        DataVector::F32(v) => Values::Float(v),
        DataVector::F64(v) => Values::Double(v),
    }
}

fn attribute_values(attr: &netcdf3::Attribute) -> Values {
    match attr.data_type() {
        DataType::I8 => Values::Byte(attr.get_i8().map(<[i8]>::to_vec).unwrap_or_default()),
        DataType::U8 => Values::Char(attr.get_u8().map(<[u8]>::to_vec).unwrap_or_default()),
        DataType::I16 => Values::Short(attr.get_i16().map(<[i16]>::to_vec).unwrap_or_default()),
        DataType::I32 => Values::Int(attr.get_i32().map(<[i32]>::to_vec).unwrap_or_default()),
        DataType::F32 => Values::Float(attr.get_f32().map(<[f32]>::to_vec).unwrap_or_default()),
        DataType::F64 => Values::Double(attr.get_f64().map(<[f64]>::to_vec).unwrap_or_default()),
    }
}
