//! PyO3 wrapper for Orchestrator
//!
//! This module provides the Python interface to the coupled runner. Both
//! models are passed in as Python BMI objects.

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use super::engine::PyBmiEngine;
use super::types::{
    coupling_error_to_py, field_to_py, parse_coupling_config, step_result_to_py, values_from_py,
};
use crate::engine::DEFAULT_STEP;
use crate::models::FieldArray;
use crate::orchestrator::Orchestrator as RustOrchestrator;

/// Python wrapper for the Rust Orchestrator
///
/// # Example (from Python)
///
/// ```python
/// from dfwr_core_rs import CoupledRunner
///
/// config = {
///     "flow": {"config_file": "fm/bay.mdu", "working_dir": "/runs/bay"},
///     "wave": {"config_file": "wave/bay.mdw", "working_dir": "/runs/bay"},
/// }
///
/// with CoupledRunner(config, dflowfm_bmi, dwaves_bmi) as runner:
///     while runner.get_current_time() < runner.get_end_time():
///         runner.update()
/// ```
#[pyclass(name = "CoupledRunner")]
pub struct PyCoupledRunner {
    inner: RustOrchestrator,
}

#[pymethods]
impl PyCoupledRunner {
    /// Create a runner from a configuration dict and two BMI objects
    ///
    /// # Errors
    ///
    /// Raises ValueError if required configuration fields are missing or
    /// invalid.
    #[new]
    fn new(config: &Bound<'_, PyDict>, flow: Py<PyAny>, wave: Py<PyAny>) -> PyResult<Self> {
        let rust_config = parse_coupling_config(config)?;
        let inner = RustOrchestrator::new(
            rust_config,
            Box::new(PyBmiEngine::new(flow)),
            Box::new(PyBmiEngine::new(wave)),
        )
        .map_err(coupling_error_to_py)?;
        Ok(PyCoupledRunner { inner })
    }

    /// Initialize both models and locate the exchange file
    fn initialize(&mut self) -> PyResult<()> {
        self.inner.initialize().map_err(coupling_error_to_py)
    }

    /// Execute one coupling step
    ///
    /// # Returns
    ///
    /// Dictionary with `step`, `bootstrapped`, `flow_time` and
    /// `fields_pushed`.
    #[pyo3(signature = (dt = DEFAULT_STEP))]
    fn update(&mut self, py: Python<'_>, dt: f64) -> PyResult<Py<PyDict>> {
        let result = self.inner.update(dt).map_err(coupling_error_to_py)?;
        step_result_to_py(py, &result)
    }

    /// Finalize flow, then wave
    fn finalize(&mut self) -> PyResult<()> {
        self.inner.finalize().map_err(coupling_error_to_py)
    }

    /// Lifecycle phase name ("uninitialized", "initialized", ...)
    fn phase(&self) -> &'static str {
        self.inner.phase().as_str()
    }

    /// SHA-256 of the run configuration
    fn config_hash(&self) -> String {
        self.inner.config_hash().to_string()
    }

    /// Path of the discovered exchange file, if initialized
    fn exchange_path(&self) -> Option<String> {
        self.inner
            .exchange_path()
            .map(|p| p.to_string_lossy().into_owned())
    }

    // ========================================================================
    // BMI surface (flow model)
    // ========================================================================

    fn get_var(&self, py: Python<'_>, name: &str) -> PyResult<PyObject> {
        let field = self.inner.get_var(name).map_err(coupling_error_to_py)?;
        field_to_py(py, &field)
    }

    /// Write a flow variable; mapped variables also update the exchange file
    fn set_var(&mut self, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let shape = self.inner.get_var_shape(name).map_err(coupling_error_to_py)?;
        let values = values_from_py(value)?;
        let field = FieldArray::new(shape, values)
            .map_err(|e| PyRuntimeError::new_err(format!("set_var '{}': {}", name, e)))?;
        self.inner.set_var(name, &field).map_err(coupling_error_to_py)
    }

    fn get_current_time(&self) -> PyResult<f64> {
        self.inner.current_time().map_err(coupling_error_to_py)
    }

    fn get_start_time(&self) -> PyResult<f64> {
        self.inner.start_time().map_err(coupling_error_to_py)
    }

    fn get_end_time(&self) -> PyResult<f64> {
        self.inner.end_time().map_err(coupling_error_to_py)
    }

    fn get_var_count(&self) -> PyResult<usize> {
        self.inner.get_var_count().map_err(coupling_error_to_py)
    }

    fn get_var_rank(&self, name: &str) -> PyResult<usize> {
        self.inner.get_var_rank(name).map_err(coupling_error_to_py)
    }

    fn get_var_shape(&self, name: &str) -> PyResult<Vec<usize>> {
        self.inner.get_var_shape(name).map_err(coupling_error_to_py)
    }

    fn get_var_type(&self, name: &str) -> PyResult<&'static str> {
        self.inner
            .get_var_type(name)
            .map(|t| t.as_str())
            .map_err(coupling_error_to_py)
    }

    fn get_var_name(&self, index: usize) -> PyResult<String> {
        self.inner.get_var_name(index).map_err(coupling_error_to_py)
    }

    fn inq_compound(&self, name: &str) -> PyResult<usize> {
        self.inner.inq_compound(name).map_err(coupling_error_to_py)
    }

    fn inq_compound_field(&self, name: &str, index: usize) -> PyResult<String> {
        self.inner
            .inq_compound_field(name, index)
            .map_err(coupling_error_to_py)
    }

    fn set_var_index(&mut self, name: &str, indices: Vec<usize>, values: Vec<f64>) -> PyResult<()> {
        self.inner
            .set_var_index(name, &indices, &values)
            .map_err(coupling_error_to_py)
    }

    fn set_var_slice(
        &mut self,
        name: &str,
        start: Vec<usize>,
        count: Vec<usize>,
        values: Vec<f64>,
    ) -> PyResult<()> {
        self.inner
            .set_var_slice(name, &start, &count, &values)
            .map_err(coupling_error_to_py)
    }

    // ========================================================================
    // Context manager
    // ========================================================================

    /// `with` entry: initialize and return the runner
    fn __enter__(mut slf: PyRefMut<'_, Self>) -> PyResult<PyRefMut<'_, Self>> {
        slf.inner.initialize().map_err(coupling_error_to_py)?;
        Ok(slf)
    }

    /// `with` exit: finalize if still active; exceptions are not suppressed
    fn __exit__(
        &mut self,
        _exc_type: &Bound<'_, PyAny>,
        _exc_value: &Bound<'_, PyAny>,
        _traceback: &Bound<'_, PyAny>,
    ) -> PyResult<bool> {
        if self.inner.phase().is_active() {
            self.inner.finalize().map_err(coupling_error_to_py)?;
        }
        Ok(false)
    }
}
