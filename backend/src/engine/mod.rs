//! Model Handles - uniform control over one external simulation engine
//!
//! An engine is anything that honours the BMI-style step contract
//! (initialize / update / finalize / get_var / set_var plus time and
//! variable introspection). The runner only ever sees engines through the
//! [`BmiEngine`] trait; the [`ModelHandle`] wraps one engine together with
//! its run configuration and enforces the lifecycle.
//!
//! # Engine Kinds
//!
//! The set of engines is closed: one hydrodynamic (`Flow`) model and one
//! `Wave` model. The kind is fixed when the handle is constructed.
//!
//! # Implementing an Engine
//!
//! ```rust
//! use dfwr_core_rs::engine::{BmiEngine, EngineError};
//! use dfwr_core_rs::models::{FieldArray, FieldType};
//! use std::path::Path;
//!
//! struct Idle { time: f64 }
//!
//! impl BmiEngine for Idle {
//!     fn initialize(&mut self, _config_file: &Path) -> Result<(), EngineError> { Ok(()) }
//!     fn update(&mut self, dt: f64) -> Result<(), EngineError> {
//!         self.time += dt.max(0.0);
//!         Ok(())
//!     }
//!     fn finalize(&mut self) -> Result<(), EngineError> { Ok(()) }
//!     fn get_current_time(&self) -> Result<f64, EngineError> { Ok(self.time) }
//!     fn get_start_time(&self) -> Result<f64, EngineError> { Ok(0.0) }
//!     fn get_end_time(&self) -> Result<f64, EngineError> { Ok(3600.0) }
//!     fn get_var(&self, name: &str) -> Result<FieldArray, EngineError> {
//!         Err(EngineError::UnknownVariable(name.to_string()))
//!     }
//!     fn set_var(&mut self, name: &str, _value: &FieldArray) -> Result<(), EngineError> {
//!         Err(EngineError::UnknownVariable(name.to_string()))
//!     }
//!     fn get_var_count(&self) -> Result<usize, EngineError> { Ok(0) }
//!     fn get_var_shape(&self, name: &str) -> Result<Vec<usize>, EngineError> {
//!         Err(EngineError::UnknownVariable(name.to_string()))
//!     }
//!     fn get_var_type(&self, name: &str) -> Result<FieldType, EngineError> {
//!         Err(EngineError::UnknownVariable(name.to_string()))
//!     }
//! }
//! ```

pub mod handle;
pub mod memory;

use crate::core::LifecyclePhase;
use crate::models::{FieldArray, FieldType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use handle::ModelHandle;
pub use memory::{CallJournal, CallOp, EngineCall, MemoryEngine};

/// Step size sentinel: advance by the engine's own default step
pub const DEFAULT_STEP: f64 = -1.0;

/// Errors reported by an engine or by the handle guarding it
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Engine call '{operation}' failed: {message}")]
    Call {
        operation: &'static str,
        message: String,
    },

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Operation '{operation}' is not valid while {phase}")]
    InvalidLifecycleState {
        operation: &'static str,
        phase: LifecyclePhase,
    },

    #[error("Field '{name}' has shape {expected:?}, write supplied {actual:?}")]
    FieldShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

impl EngineError {
    /// Engine-reported failure of `operation`
    pub fn call(operation: &'static str, message: impl Into<String>) -> Self {
        EngineError::Call {
            operation,
            message: message.into(),
        }
    }
}

/// Engine error tagged with the model it came from
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} model: {source}")]
pub struct ModelError {
    pub kind: ModelKind,
    pub source: EngineError,
}

impl ModelError {
    pub fn new(kind: ModelKind, source: EngineError) -> Self {
        Self { kind, source }
    }
}

/// Which of the two coupled engines a handle drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Hydrodynamic model; owns the exchange file
    Flow,
    /// Wave model; reads the exchange file internally
    Wave,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Flow => "flow",
            ModelKind::Wave => "wave",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run configuration for a single engine
///
/// Replaces any process-wide environment lookup: everything a handle needs
/// to start its engine is carried here explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Engine kind this configuration is meant for
    pub kind: ModelKind,

    /// Engine-specific run configuration (e.g. an `.mdu` or `.mdw` file)
    pub config_file: PathBuf,

    /// Directory the engine runs in; relative config paths resolve here
    #[serde(default)]
    pub working_dir: PathBuf,
}

impl ModelConfig {
    pub fn new(
        kind: ModelKind,
        config_file: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            config_file: config_file.into(),
            working_dir: working_dir.into(),
        }
    }

    /// Config file path as handed to the engine
    pub fn resolved_config_file(&self) -> PathBuf {
        if self.config_file.is_absolute() {
            self.config_file.clone()
        } else {
            self.working_dir.join(&self.config_file)
        }
    }

    /// Base name of the run: config file name without extension
    ///
    /// ```
    /// use dfwr_core_rs::{ModelConfig, ModelKind};
    ///
    /// let cfg = ModelConfig::new(ModelKind::Flow, "models/harbour.mdu", "/runs");
    /// assert_eq!(cfg.run_name().as_deref(), Some("harbour"));
    /// ```
    pub fn run_name(&self) -> Option<String> {
        self.config_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }

    /// Output directory the engine writes to: `<working dir>/<prefix><run name>`
    ///
    /// The directory sits next to the resolved config file when the config
    /// lives in a subdirectory of the working directory.
    pub fn output_dir(&self, prefix: &str) -> Option<PathBuf> {
        let name = self.run_name()?;
        let resolved = self.resolved_config_file();
        let base = resolved.parent().unwrap_or_else(|| Path::new(""));
        Some(base.join(format!("{}{}", prefix, name)))
    }
}

/// BMI-style control contract over one simulation engine
///
/// Implementations are thin synchronous proxies: every call blocks until
/// the engine has completed it. `update(dt)` with a negative `dt` means
/// "advance by the engine's default step"; `dt == 0` must be accepted as a
/// no-op step.
pub trait BmiEngine: Send {
    fn initialize(&mut self, config_file: &Path) -> Result<(), EngineError>;

    fn update(&mut self, dt: f64) -> Result<(), EngineError>;

    fn finalize(&mut self) -> Result<(), EngineError>;

    fn get_current_time(&self) -> Result<f64, EngineError>;

    fn get_start_time(&self) -> Result<f64, EngineError>;

    fn get_end_time(&self) -> Result<f64, EngineError>;

    /// Copy of the whole named variable
    fn get_var(&self, name: &str) -> Result<FieldArray, EngineError>;

    /// Overwrite the whole named variable
    fn set_var(&mut self, name: &str, value: &FieldArray) -> Result<(), EngineError>;

    /// Number of exposed variables
    fn get_var_count(&self) -> Result<usize, EngineError>;

    fn get_var_rank(&self, name: &str) -> Result<usize, EngineError> {
        Ok(self.get_var_shape(name)?.len())
    }

    fn get_var_shape(&self, name: &str) -> Result<Vec<usize>, EngineError>;

    fn get_var_type(&self, name: &str) -> Result<FieldType, EngineError>;
}
