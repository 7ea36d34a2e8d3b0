//! In-process engine for dry runs and tests
//!
//! `MemoryEngine` honours the full [`BmiEngine`] contract without any
//! external process: variables live in a map, time advances by the
//! requested step, and an optional step hook lets callers evolve fields
//! over time. Calls can be recorded in a [`CallJournal`] shared between
//! several engines, so the relative order of flow and wave calls can be
//! checked after a coupled run.
//!
//! NOTE: Available in all builds to support integration testing and
//! configuration dry runs; it does not model any physics.

use super::{BmiEngine, EngineError};
use crate::models::{FieldArray, FieldType};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Operation recorded in a [`CallJournal`]
#[derive(Debug, Clone, PartialEq)]
pub enum CallOp {
    Initialize,
    Update(f64),
    Finalize,
    GetVar(String),
    SetVar(String),
}

/// One recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    pub engine: String,
    pub op: CallOp,
}

/// Shared, ordered record of engine calls
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, engine: &str, op: CallOp) {
        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        calls.push(EngineCall {
            engine: engine.to_string(),
            op,
        });
    }

    /// Snapshot of every call recorded so far
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Step sizes passed to `update` on one engine, in call order
    pub fn updates_of(&self, engine: &str) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter(|c| c.engine == engine)
            .filter_map(|c| match c.op {
                CallOp::Update(dt) => Some(dt),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

type StepHook = Box<dyn FnMut(f64, &mut BTreeMap<String, FieldArray>) + Send>;

/// Deterministic in-memory engine
pub struct MemoryEngine {
    name: String,
    start_time: f64,
    end_time: f64,
    default_step: f64,
    time: f64,
    initialized: bool,
    config_file: Option<PathBuf>,
    fields: BTreeMap<String, FieldArray>,
    types: BTreeMap<String, FieldType>,
    failures: HashMap<&'static str, String>,
    journal: Option<CallJournal>,
    step_hook: Option<StepHook>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("name", &self.name)
            .field("time", &self.time)
            .field("initialized", &self.initialized)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// New engine starting at time 0 with a one-second default step and a
    /// one-day horizon
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: 0.0,
            end_time: 86_400.0,
            default_step: 1.0,
            time: 0.0,
            initialized: false,
            config_file: None,
            fields: BTreeMap::new(),
            types: BTreeMap::new(),
            failures: HashMap::new(),
            journal: None,
            step_hook: None,
        }
    }

    /// Add a double-precision variable
    pub fn with_field(mut self, name: impl Into<String>, value: FieldArray) -> Self {
        let name = name.into();
        self.types.insert(name.clone(), FieldType::Double);
        self.fields.insert(name, value);
        self
    }

    /// Add a variable with an explicit element type
    pub fn with_typed_field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        value: FieldArray,
    ) -> Self {
        let name = name.into();
        self.types.insert(name.clone(), field_type);
        self.fields.insert(name, value);
        self
    }

    /// Simulation window; current time starts at `start`
    pub fn with_time_window(mut self, start: f64, end: f64) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.time = start;
        self
    }

    /// Step used when `update` receives a negative `dt`
    pub fn with_default_step(mut self, step: f64) -> Self {
        self.default_step = step;
        self
    }

    /// Record every call into `journal`
    pub fn with_journal(mut self, journal: CallJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Make `operation` ("initialize", "update", "finalize", "get_var",
    /// "set_var") fail with `message`
    pub fn failing_on(mut self, operation: &'static str, message: impl Into<String>) -> Self {
        self.failures.insert(operation, message.into());
        self
    }

    /// Called after every non-zero step with the new time and the fields
    pub fn with_step_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(f64, &mut BTreeMap<String, FieldArray>) + Send + 'static,
    {
        self.step_hook = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Config file passed to the last `initialize`
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    fn record(&self, op: CallOp) {
        if let Some(journal) = &self.journal {
            journal.record(&self.name, op);
        }
    }

    fn check(&self, operation: &'static str) -> Result<(), EngineError> {
        match self.failures.get(operation) {
            Some(message) => Err(EngineError::call(operation, message.clone())),
            None => Ok(()),
        }
    }

    fn require_initialized(&self, operation: &'static str) -> Result<(), EngineError> {
        if self.initialized {
            Ok(())
        } else {
            Err(EngineError::call(operation, format!("{} is not initialized", self.name)))
        }
    }

    fn field(&self, name: &str) -> Result<&FieldArray, EngineError> {
        self.fields
            .get(name)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))
    }
}

impl BmiEngine for MemoryEngine {
    fn initialize(&mut self, config_file: &Path) -> Result<(), EngineError> {
        self.record(CallOp::Initialize);
        self.check("initialize")?;
        self.config_file = Some(config_file.to_path_buf());
        self.time = self.start_time;
        self.initialized = true;
        Ok(())
    }

    fn update(&mut self, dt: f64) -> Result<(), EngineError> {
        self.record(CallOp::Update(dt));
        self.check("update")?;
        self.require_initialized("update")?;
        let step = if dt < 0.0 { self.default_step } else { dt };
        if step > 0.0 {
            self.time += step;
            if let Some(hook) = self.step_hook.as_mut() {
                hook(self.time, &mut self.fields);
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        self.record(CallOp::Finalize);
        self.initialized = false;
        self.check("finalize")
    }

    fn get_current_time(&self) -> Result<f64, EngineError> {
        Ok(self.time)
    }

    fn get_start_time(&self) -> Result<f64, EngineError> {
        Ok(self.start_time)
    }

    fn get_end_time(&self) -> Result<f64, EngineError> {
        Ok(self.end_time)
    }

    fn get_var(&self, name: &str) -> Result<FieldArray, EngineError> {
        self.record(CallOp::GetVar(name.to_string()));
        self.check("get_var")?;
        self.field(name).cloned()
    }

    fn set_var(&mut self, name: &str, value: &FieldArray) -> Result<(), EngineError> {
        self.record(CallOp::SetVar(name.to_string()));
        self.check("set_var")?;
        let slot = self
            .fields
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        *slot = value.clone();
        Ok(())
    }

    fn get_var_count(&self) -> Result<usize, EngineError> {
        Ok(self.fields.len())
    }

    fn get_var_shape(&self, name: &str) -> Result<Vec<usize>, EngineError> {
        Ok(self.field(name)?.shape().to_vec())
    }

    fn get_var_type(&self, name: &str) -> Result<FieldType, EngineError> {
        self.types
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))
    }
}
