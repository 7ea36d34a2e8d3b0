//! Type conversion utilities for FFI boundary
//!
//! Converts between Rust types and PyO3-compatible types (PyDict, PyList, etc.)

use pyo3::exceptions::{PyNotImplementedError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::engine::{ModelConfig, ModelKind};
use crate::mapping::{Sign, VariableMap, VariableMapping};
use crate::models::FieldArray;
use crate::orchestrator::{CouplingConfig, CouplingError, ExchangeConfig, StepResult};

// ========================================================================
// PyDict Extraction Helpers
// ========================================================================

/// Extract a required field from a Python dict with clear error messages.
///
/// # Errors
/// Returns PyValueError if the field is missing; conversion errors are
/// propagated as raised by PyO3.
fn extract_required<T>(dict: &Bound<'_, PyDict>, key: &str) -> PyResult<T>
where
    T: for<'py> FromPyObject<'py>,
{
    dict.get_item(key)?
        .ok_or_else(|| PyValueError::new_err(format!("Missing required field '{}'", key)))?
        .extract()
}

/// Extract an optional field from a Python dict.
///
/// `None` values are treated like missing keys.
fn extract_optional<T>(dict: &Bound<'_, PyDict>, key: &str) -> PyResult<Option<T>>
where
    T: for<'py> FromPyObject<'py>,
{
    match dict.get_item(key)? {
        Some(value) if !value.is_none() => Ok(Some(value.extract()?)),
        _ => Ok(None),
    }
}

// ========================================================================
// Configuration Parsers
// ========================================================================

/// Convert Python dict to CouplingConfig
///
/// ```python
/// {
///     "flow": {"config_file": "fm/bay.mdu", "working_dir": "/runs/bay"},
///     "wave": {"config_file": "wave/bay.mdw", "working_dir": "/runs/bay"},
///     "exchange": {"output_dir_prefix": "DFM_OUTPUT_", "file_pattern": None},
///     "variables": {"bl": {"exchange_field": "FlowElem_zcc", "sign": -1}},
/// }
/// ```
///
/// `exchange` and `variables` are optional.
pub fn parse_coupling_config(py_config: &Bound<'_, PyDict>) -> PyResult<CouplingConfig> {
    let flow = parse_model_config(&required_dict(py_config, "flow")?, ModelKind::Flow)?;
    let wave = parse_model_config(&required_dict(py_config, "wave")?, ModelKind::Wave)?;

    let mut config = CouplingConfig::new(flow, wave);

    if let Some(py_exchange) = optional_dict(py_config, "exchange")? {
        let defaults = ExchangeConfig::default();
        config.exchange = ExchangeConfig {
            output_dir_prefix: extract_optional(&py_exchange, "output_dir_prefix")?
                .unwrap_or(defaults.output_dir_prefix),
            file_pattern: extract_optional(&py_exchange, "file_pattern")?,
        };
    }

    if let Some(py_vars) = optional_dict(py_config, "variables")? {
        config.variables = parse_variable_map(&py_vars)?;
    }

    config.validate().map_err(coupling_error_to_py)?;
    Ok(config)
}

fn parse_model_config(dict: &Bound<'_, PyDict>, kind: ModelKind) -> PyResult<ModelConfig> {
    let config_file: PathBuf = extract_required(dict, "config_file")?;
    let working_dir: PathBuf = extract_optional(dict, "working_dir")?.unwrap_or_default();
    Ok(ModelConfig::new(kind, config_file, working_dir))
}

fn parse_variable_map(dict: &Bound<'_, PyDict>) -> PyResult<VariableMap> {
    let mut entries = BTreeMap::new();
    for (key, value) in dict.iter() {
        let host_var: String = key.extract()?;
        let entry: Bound<'_, PyDict> = value.downcast_into()?;
        let exchange_field: String = extract_required(&entry, "exchange_field")?;
        let raw_sign: i64 = extract_optional(&entry, "sign")?.unwrap_or(1);
        let sign = Sign::try_from(raw_sign).map_err(|e| PyValueError::new_err(e.to_string()))?;
        entries.insert(host_var, VariableMapping::new(exchange_field, sign));
    }
    Ok(VariableMap::new(entries))
}

fn required_dict<'py>(dict: &Bound<'py, PyDict>, key: &str) -> PyResult<Bound<'py, PyDict>> {
    let value = dict
        .get_item(key)?
        .ok_or_else(|| PyValueError::new_err(format!("Missing required field '{}'", key)))?;
    Ok(value.downcast_into()?)
}

fn optional_dict<'py>(
    dict: &Bound<'py, PyDict>,
    key: &str,
) -> PyResult<Option<Bound<'py, PyDict>>> {
    match dict.get_item(key)? {
        Some(value) if !value.is_none() => Ok(Some(value.downcast_into()?)),
        _ => Ok(None),
    }
}

// ========================================================================
// Field Conversion
// ========================================================================

/// Flatten any Python sequence or numpy array into row-major values
///
/// Objects with a `ravel` method (numpy arrays) are flattened first.
pub fn values_from_py(obj: &Bound<'_, PyAny>) -> PyResult<Vec<f64>> {
    if obj.hasattr("ravel")? {
        return obj.call_method0("ravel")?.call_method0("tolist")?.extract();
    }
    if let Ok(value) = obj.extract::<f64>() {
        return Ok(vec![value]);
    }
    obj.extract()
}

/// Python value for a field: a numpy array of the field's shape when numpy
/// is importable, a flat list otherwise
pub fn field_to_py(py: Python<'_>, field: &FieldArray) -> PyResult<PyObject> {
    let list = PyList::new_bound(py, field.values());
    match py.import_bound("numpy") {
        Ok(numpy) => {
            let array = numpy.call_method1("array", (list,))?;
            Ok(array
                .call_method1("reshape", (field.shape().to_vec(),))?
                .unbind())
        }
        Err(_) => Ok(list.into_any().unbind()),
    }
}

/// Convert StepResult to Python dict
pub fn step_result_to_py(py: Python<'_>, result: &StepResult) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("step", result.step)?;
    dict.set_item("bootstrapped", result.bootstrapped)?;
    dict.set_item("flow_time", result.flow_time)?;
    dict.set_item("fields_pushed", result.fields_pushed)?;
    Ok(dict.unbind())
}

// ========================================================================
// Error Mapping
// ========================================================================

/// Map a coupling error onto the closest Python exception type
pub fn coupling_error_to_py(err: CouplingError) -> PyErr {
    match &err {
        CouplingError::NotImplemented(_) => PyNotImplementedError::new_err(err.to_string()),
        CouplingError::InvalidConfig(_) | CouplingError::Mapping(_) => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}
