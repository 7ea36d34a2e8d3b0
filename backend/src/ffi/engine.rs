//! Python BMI objects as engines
//!
//! Any Python object with the BMI method set (`initialize`, `update`,
//! `finalize`, `get_var`, `set_var`, `get_current_time`, ...) can drive a
//! model handle. Each call acquires the GIL and forwards to the object.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyList;
use std::path::Path;

use super::types::values_from_py;
use crate::engine::{BmiEngine, EngineError};
use crate::models::{shape_from_dims, FieldArray, FieldType};

/// Engine backed by a Python BMI object
pub struct PyBmiEngine {
    inner: Py<PyAny>,
}

impl PyBmiEngine {
    pub fn new(inner: Py<PyAny>) -> Self {
        Self { inner }
    }

    fn call<T>(
        &self,
        operation: &'static str,
        f: impl for<'py> FnOnce(&Bound<'py, PyAny>) -> PyResult<T>,
    ) -> Result<T, EngineError> {
        Python::with_gil(|py| f(self.inner.bind(py)))
            .map_err(|e| EngineError::call(operation, e.to_string()))
    }
}

impl BmiEngine for PyBmiEngine {
    fn initialize(&mut self, config_file: &Path) -> Result<(), EngineError> {
        let path = config_file.to_string_lossy().into_owned();
        self.call("initialize", |obj| {
            obj.call_method1("initialize", (path,)).map(|_| ())
        })
    }

    fn update(&mut self, dt: f64) -> Result<(), EngineError> {
        self.call("update", |obj| obj.call_method1("update", (dt,)).map(|_| ()))
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        self.call("finalize", |obj| obj.call_method0("finalize").map(|_| ()))
    }

    fn get_current_time(&self) -> Result<f64, EngineError> {
        self.call("get_current_time", |obj| {
            obj.call_method0("get_current_time")?.extract()
        })
    }

    fn get_start_time(&self) -> Result<f64, EngineError> {
        self.call("get_start_time", |obj| {
            obj.call_method0("get_start_time")?.extract()
        })
    }

    fn get_end_time(&self) -> Result<f64, EngineError> {
        self.call("get_end_time", |obj| obj.call_method0("get_end_time")?.extract())
    }

    fn get_var(&self, name: &str) -> Result<FieldArray, EngineError> {
        let shape = self.get_var_shape(name)?;
        let values = self.call("get_var", |obj| {
            values_from_py(&obj.call_method1("get_var", (name,))?)
        })?;
        FieldArray::new(shape, values).map_err(|e| EngineError::call("get_var", e.to_string()))
    }

    fn set_var(&mut self, name: &str, value: &FieldArray) -> Result<(), EngineError> {
        self.call("set_var", |obj| {
            let py = obj.py();
            let list = PyList::new_bound(py, value.values());
            let payload = match py.import_bound("numpy") {
                Ok(numpy) => numpy
                    .call_method1("array", (list,))?
                    .call_method1("reshape", (value.shape().to_vec(),))?,
                Err(_) => list.into_any(),
            };
            obj.call_method1("set_var", (name, payload)).map(|_| ())
        })
    }

    fn get_var_count(&self) -> Result<usize, EngineError> {
        self.call("get_var_count", |obj| obj.call_method0("get_var_count")?.extract())
    }

    fn get_var_rank(&self, name: &str) -> Result<usize, EngineError> {
        self.call("get_var_rank", |obj| {
            obj.call_method1("get_var_rank", (name,))?.extract()
        })
    }

    fn get_var_shape(&self, name: &str) -> Result<Vec<usize>, EngineError> {
        self.call("get_var_shape", |obj| {
            let mut shape = obj.call_method1("get_var_shape", (name,))?;
            if shape.hasattr("tolist")? {
                shape = shape.call_method0("tolist")?;
            }
            let dims: Vec<i64> = shape.extract()?;
            shape_from_dims(&dims).map_err(|e| PyValueError::new_err(e.to_string()))
        })
    }

    fn get_var_type(&self, name: &str) -> Result<FieldType, EngineError> {
        let raw: String = self.call("get_var_type", |obj| {
            obj.call_method1("get_var_type", (name,))?.extract()
        })?;
        FieldType::parse(&raw).ok_or_else(|| {
            EngineError::call("get_var_type", format!("unsupported type '{}' for {}", raw, name))
        })
    }
}
