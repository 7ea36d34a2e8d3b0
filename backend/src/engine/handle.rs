//! Lifecycle-guarded proxy over one engine

use super::{BmiEngine, EngineError, ModelConfig, ModelError, ModelKind};
use crate::core::LifecyclePhase;
use crate::models::{FieldArray, FieldType};
use tracing::{debug, info};

/// One engine plus its run configuration and lifecycle phase
///
/// Every operation other than `initialize`/`finalize` requires the handle
/// to be `Initialized` or `Running`. The handle does no buffering; each
/// call goes straight to the engine.
pub struct ModelHandle {
    config: ModelConfig,
    engine: Box<dyn BmiEngine>,
    phase: LifecyclePhase,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn new(config: ModelConfig, engine: Box<dyn BmiEngine>) -> Self {
        Self {
            config,
            engine,
            phase: LifecyclePhase::Uninitialized,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.config.kind
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    fn err(&self, source: EngineError) -> ModelError {
        ModelError::new(self.kind(), source)
    }

    fn require_active(&self, operation: &'static str) -> Result<(), ModelError> {
        if self.phase.is_active() {
            Ok(())
        } else {
            Err(self.err(EngineError::InvalidLifecycleState {
                operation,
                phase: self.phase,
            }))
        }
    }

    /// Start the engine with its resolved config file
    pub fn initialize(&mut self) -> Result<(), ModelError> {
        if self.phase != LifecyclePhase::Uninitialized {
            return Err(self.err(EngineError::InvalidLifecycleState {
                operation: "initialize",
                phase: self.phase,
            }));
        }
        let config_file = self.config.resolved_config_file();
        self.engine
            .initialize(&config_file)
            .map_err(|e| self.err(e))?;
        self.phase = LifecyclePhase::Initialized;
        info!(model = %self.kind(), config = %config_file.display(), "model initialized");
        Ok(())
    }

    /// Advance the engine by `dt` (negative = engine default step)
    pub fn advance(&mut self, dt: f64) -> Result<(), ModelError> {
        self.require_active("advance")?;
        debug!(model = %self.kind(), dt, "advance");
        self.engine.update(dt).map_err(|e| self.err(e))?;
        self.phase = LifecyclePhase::Running;
        Ok(())
    }

    /// Stop the engine. The handle is `Finalized` afterwards even when the
    /// engine reports an error.
    pub fn finalize(&mut self) -> Result<(), ModelError> {
        self.require_active("finalize")?;
        let result = self.engine.finalize();
        self.phase = LifecyclePhase::Finalized;
        info!(model = %self.kind(), ok = result.is_ok(), "model finalized");
        result.map_err(|e| self.err(e))
    }

    pub fn current_time(&self) -> Result<f64, ModelError> {
        self.require_active("current_time")?;
        self.engine.get_current_time().map_err(|e| self.err(e))
    }

    pub fn start_time(&self) -> Result<f64, ModelError> {
        self.require_active("start_time")?;
        self.engine.get_start_time().map_err(|e| self.err(e))
    }

    pub fn end_time(&self) -> Result<f64, ModelError> {
        self.require_active("end_time")?;
        self.engine.get_end_time().map_err(|e| self.err(e))
    }

    /// Copy of the whole named field
    pub fn read_field(&self, name: &str) -> Result<FieldArray, ModelError> {
        self.require_active("read_field")?;
        self.engine.get_var(name).map_err(|e| self.err(e))
    }

    /// Overwrite the whole named field; shape must match the engine's
    pub fn write_field(&mut self, name: &str, values: &FieldArray) -> Result<(), ModelError> {
        self.require_active("write_field")?;
        let expected = self.engine.get_var_shape(name).map_err(|e| self.err(e))?;
        if expected.as_slice() != values.shape() {
            return Err(self.err(EngineError::FieldShapeMismatch {
                name: name.to_string(),
                expected,
                actual: values.shape().to_vec(),
            }));
        }
        self.engine.set_var(name, values).map_err(|e| self.err(e))
    }

    pub fn field_count(&self) -> Result<usize, ModelError> {
        self.require_active("field_count")?;
        self.engine.get_var_count().map_err(|e| self.err(e))
    }

    pub fn field_rank(&self, name: &str) -> Result<usize, ModelError> {
        self.require_active("field_rank")?;
        self.engine.get_var_rank(name).map_err(|e| self.err(e))
    }

    pub fn field_shape(&self, name: &str) -> Result<Vec<usize>, ModelError> {
        self.require_active("field_shape")?;
        self.engine.get_var_shape(name).map_err(|e| self.err(e))
    }

    pub fn field_type(&self, name: &str) -> Result<FieldType, ModelError> {
        self.require_active("field_type")?;
        self.engine.get_var_type(name).map_err(|e| self.err(e))
    }
}
