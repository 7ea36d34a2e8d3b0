//! Orchestrator Engine - coupled flow/wave stepping
//!
//! Drives a flow engine and a wave engine through one shared lifecycle and
//! relays flow state to the wave engine through the exchange file.
//!
//! # Architecture
//!
//! ```text
//! initialize():
//! 1. Initialize flow, then wave
//! 2. Discover the exchange file in the flow output directory
//! 3. Validate the variable map against the exchange file
//!
//! update(dt):
//! 1. Bootstrap (first step, flow time == 0): wave.advance(0),
//!                                            flow.advance(flow time)
//!    otherwise:                              wave.advance(dt)
//! 2. flow.advance(dt)
//! 3. For every mapped variable: exchange[field] = sign * flow[var]
//!
//! finalize():
//! 1. Finalize flow, then wave (both always attempted)
//! ```
//!
//! # Example
//!
//! ```rust
//! use dfwr_core_rs::engine::MemoryEngine;
//! use dfwr_core_rs::exchange::{Dataset, ExchangeChannel, NetcdfCodec};
//! use dfwr_core_rs::{CouplingConfig, FieldArray, ModelConfig, ModelKind, Orchestrator};
//! use std::sync::Arc;
//!
//! let run = tempfile::tempdir().unwrap();
//! let out = run.path().join("DFM_OUTPUT_bay");
//! std::fs::create_dir_all(&out).unwrap();
//! let seed = Dataset::new()
//!     .with_dimension("nFlowElem", 3)
//!     .with_variable("FlowElem_zcc", &["nFlowElem"], vec![0.0; 3]);
//! ExchangeChannel::create(out.join("bay_com.nc"), &seed, Arc::new(NetcdfCodec)).unwrap();
//!
//! let config = CouplingConfig::new(
//!     ModelConfig::new(ModelKind::Flow, "bay.mdu", run.path()),
//!     ModelConfig::new(ModelKind::Wave, "bay.mdw", run.path()),
//! );
//! let flow = MemoryEngine::new("flow").with_field("bl", FieldArray::vector(vec![1.0, 2.0, 3.0]));
//! let wave = MemoryEngine::new("wave");
//!
//! let mut orch = Orchestrator::new(config, Box::new(flow), Box::new(wave)).unwrap();
//! orch.initialize().unwrap();
//! orch.update(60.0).unwrap();
//!
//! let pushed = ExchangeChannel::open(out.join("bay_com.nc")).read_field("FlowElem_zcc").unwrap();
//! assert_eq!(pushed.values(), &[-1.0, -2.0, -3.0]);
//! orch.finalize().unwrap();
//! ```

use crate::core::LifecyclePhase;
use crate::engine::{BmiEngine, ModelError, ModelHandle, ModelKind};
use crate::exchange::{ChannelError, DatasetCodec, ExchangeChannel, NetcdfCodec};
use crate::mapping::{MappingError, VariableMap};
use crate::models::{Event, EventLog, FieldArray, FieldType};
use crate::orchestrator::config::{compute_config_hash, CouplingConfig};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors and Results
// ============================================================================

/// Coupling error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CouplingError {
    /// Configuration validation error
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Operation called out of lifecycle sequence
    #[error("Operation '{operation}' is not valid while the runner is {phase}")]
    InvalidLifecycleState {
        operation: &'static str,
        phase: LifecyclePhase,
    },

    /// Failure inside one of the two models (includes shape mismatches)
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Exchange file discovery, read or rewrite failure
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Variable map does not fit the exchange file
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Extended BMI operation this runner does not provide
    #[error("BMI extended function '{0}' is not implemented")]
    NotImplemented(&'static str),

    /// Flow time did not move during `run_until_end`
    #[error("Flow model time is stuck at {time}")]
    Stalled { time: f64 },

    /// Configuration could not be serialized for hashing
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result of a single coupling step
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Step number (1-based)
    pub step: usize,

    /// True when the first-step bootstrap branch ran
    pub bootstrapped: bool,

    /// Flow model time after the step
    pub flow_time: f64,

    /// Number of fields written to the exchange file
    pub fields_pushed: usize,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coupled runner owning both model handles and the exchange channel
pub struct Orchestrator {
    config: CouplingConfig,
    config_hash: String,
    flow: ModelHandle,
    wave: ModelHandle,
    variables: VariableMap,
    codec: Arc<dyn DatasetCodec>,
    /// Set once `initialize()` has located the exchange file
    channel: Option<ExchangeChannel>,
    phase: LifecyclePhase,
    step: usize,
    /// Set once the first-step bootstrap has run
    bootstrapped: bool,
    event_log: EventLog,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config_hash", &self.config_hash)
            .field("flow", &self.flow)
            .field("wave", &self.wave)
            .field("channel", &self.channel.as_ref().map(|c| c.path().to_path_buf()))
            .field("phase", &self.phase)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create a new orchestrator from configuration and two engines
    ///
    /// Validates the configuration; nothing is started until
    /// `initialize()`.
    pub fn new(
        config: CouplingConfig,
        flow_engine: Box<dyn BmiEngine>,
        wave_engine: Box<dyn BmiEngine>,
    ) -> Result<Self, CouplingError> {
        config.validate()?;
        let config_hash = compute_config_hash(&config)?;

        Ok(Self {
            flow: ModelHandle::new(config.flow.clone(), flow_engine),
            wave: ModelHandle::new(config.wave.clone(), wave_engine),
            variables: config.variables.clone(),
            codec: Arc::new(NetcdfCodec),
            channel: None,
            phase: LifecyclePhase::Uninitialized,
            step: 0,
            bootstrapped: false,
            event_log: EventLog::new(),
            config_hash,
            config,
        })
    }

    /// Use a different exchange-file codec (before `initialize()`)
    pub fn with_codec(mut self, codec: Arc<dyn DatasetCodec>) -> Self {
        self.codec = codec;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Number of completed `update` calls
    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn config(&self) -> &CouplingConfig {
        &self.config
    }

    /// SHA-256 of the canonical configuration
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    /// Exchange file path, once discovered
    pub fn exchange_path(&self) -> Option<&Path> {
        self.channel.as_ref().map(|c| c.path())
    }

    pub fn flow(&self) -> &ModelHandle {
        &self.flow
    }

    pub fn wave(&self) -> &ModelHandle {
        &self.wave
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    fn require_active(&self, operation: &'static str) -> Result<(), CouplingError> {
        if self.phase.is_active() {
            Ok(())
        } else {
            Err(CouplingError::InvalidLifecycleState {
                operation,
                phase: self.phase,
            })
        }
    }

    fn channel(&self, operation: &'static str) -> Result<&ExchangeChannel, CouplingError> {
        self.channel
            .as_ref()
            .ok_or(CouplingError::InvalidLifecycleState {
                operation,
                phase: self.phase,
            })
    }

    fn handle_mut(&mut self, kind: ModelKind) -> &mut ModelHandle {
        match kind {
            ModelKind::Flow => &mut self.flow,
            ModelKind::Wave => &mut self.wave,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start both engines and locate the exchange file
    ///
    /// Any failure is fatal: engines already started are finalized
    /// best-effort and the orchestrator ends up `Finalized`.
    pub fn initialize(&mut self) -> Result<(), CouplingError> {
        if self.phase != LifecyclePhase::Uninitialized {
            return Err(CouplingError::InvalidLifecycleState {
                operation: "initialize",
                phase: self.phase,
            });
        }

        match self.start_and_discover() {
            Ok(channel) => {
                info!(
                    exchange = %channel.path().display(),
                    config_hash = %self.config_hash,
                    "coupled run initialized"
                );
                self.event_log.log(Event::Initialized {
                    exchange_path: channel.path().to_path_buf(),
                });
                self.channel = Some(channel);
                self.phase = LifecyclePhase::Initialized;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "initialization failed; shutting down started models");
                for handle in [&mut self.flow, &mut self.wave] {
                    if handle.phase().is_active() {
                        if let Err(e) = handle.finalize() {
                            warn!(model = %handle.kind(), error = %e, "finalize after failed start");
                        }
                    }
                }
                self.phase = LifecyclePhase::Finalized;
                Err(err)
            }
        }
    }

    fn start_and_discover(&mut self) -> Result<ExchangeChannel, CouplingError> {
        // Flow first: the exchange file only exists once flow has started
        self.flow.initialize()?;
        self.wave.initialize()?;

        let root = self.config.exchange_search_root()?;
        let pattern = self.config.exchange_pattern()?;
        let channel = ExchangeChannel::discover_with_codec(&root, &pattern, self.codec.clone())?;

        self.variables.validate_fields(&channel.field_names()?)?;
        Ok(channel)
    }

    /// Execute one coupling step
    ///
    /// `dt` is passed to both engines unchanged; `-1` requests each
    /// engine's default step.
    pub fn update(&mut self, dt: f64) -> Result<StepResult, CouplingError> {
        self.require_active("update")?;
        let step = self.step + 1;

        // STEP 1: WAVE (with first-step bootstrap)
        let flow_time = self.flow.current_time()?;
        let bootstrapped = !self.bootstrapped && flow_time == 0.0;
        if bootstrapped {
            debug!(step, "bootstrap step");
            self.bootstrapped = true;
            self.event_log.log(Event::Bootstrap { step });
            self.advance(ModelKind::Wave, step, 0.0)?;
            self.advance(ModelKind::Flow, step, flow_time)?;
        } else {
            self.advance(ModelKind::Wave, step, dt)?;
        }

        // STEP 2: FLOW
        self.advance(ModelKind::Flow, step, dt)?;

        // STEP 3: EXCHANGE PUSH
        let fields_pushed = self.push_exchange(step)?;

        self.step = step;
        self.phase = LifecyclePhase::Running;

        Ok(StepResult {
            step,
            bootstrapped,
            flow_time: self.flow.current_time()?,
            fields_pushed,
        })
    }

    fn advance(&mut self, kind: ModelKind, step: usize, dt: f64) -> Result<(), CouplingError> {
        self.handle_mut(kind).advance(dt)?;
        self.event_log.log(Event::ModelAdvanced {
            step,
            model: kind,
            dt,
        });
        Ok(())
    }

    /// Copy every mapped flow field into the exchange file
    fn push_exchange(&mut self, step: usize) -> Result<usize, CouplingError> {
        let channel = self.channel("update")?.clone();
        let mut pushed = 0;
        for (host_var, mapping) in self.variables.iter() {
            let values = self.flow.read_field(host_var)?;
            channel.replace_field(&mapping.exchange_field, &mapping.sign.apply(&values))?;
            debug!(step, host_var, field = %mapping.exchange_field, sign = %mapping.sign, "exchange push");
            self.event_log.log(Event::ExchangePushed {
                step,
                host_var: host_var.to_string(),
                exchange_field: mapping.exchange_field.clone(),
                sign: mapping.sign,
            });
            pushed += 1;
        }
        Ok(pushed)
    }

    /// Step with `dt` until the flow model reaches its end time
    ///
    /// Returns the number of steps taken. Fails with `Stalled` when a step
    /// leaves flow time unchanged.
    pub fn run_until_end(&mut self, dt: f64) -> Result<usize, CouplingError> {
        self.require_active("run_until_end")?;
        if dt == 0.0 {
            return Err(CouplingError::InvalidConfig(
                "run_until_end needs a non-zero step".to_string(),
            ));
        }
        let end = self.flow.end_time()?;
        let mut steps = 0;
        let mut time = self.flow.current_time()?;
        while time < end {
            let result = self.update(dt)?;
            steps += 1;
            if result.flow_time <= time {
                return Err(CouplingError::Stalled { time });
            }
            time = result.flow_time;
        }
        Ok(steps)
    }

    /// Finalize flow, then wave
    ///
    /// Both engines are always attempted; the first error (flow before
    /// wave) is returned. The orchestrator is `Finalized` afterwards.
    pub fn finalize(&mut self) -> Result<(), CouplingError> {
        self.require_active("finalize")?;

        let flow_result = self.flow.finalize();
        let wave_result = self.wave.finalize();
        self.phase = LifecyclePhase::Finalized;

        let clean = flow_result.is_ok() && wave_result.is_ok();
        self.event_log.log(Event::Finalized {
            step: self.step,
            clean,
        });
        info!(steps = self.step, clean, "coupled run finalized");

        flow_result?;
        wave_result?;
        Ok(())
    }

    // ========================================================================
    // Variable Access
    // ========================================================================

    /// Read a flow variable
    pub fn get_var(&self, name: &str) -> Result<FieldArray, CouplingError> {
        self.require_active("get_var")?;
        Ok(self.flow.read_field(name)?)
    }

    /// Write a flow variable
    ///
    /// Mapped variables are then written to the exchange file
    /// (sign-adjusted), so the wave model sees the override on its next
    /// read. A value the flow model rejects never reaches the exchange
    /// file.
    pub fn set_var(&mut self, name: &str, value: &FieldArray) -> Result<(), CouplingError> {
        self.require_active("set_var")?;

        self.flow.write_field(name, value)?;

        if let Some((field, sign)) = self.variables.resolve(name) {
            let channel = self.channel("set_var")?;
            channel.replace_field(field, &sign.apply(value))?;
            debug!(host_var = name, field, "exchange override");
            self.event_log.log(Event::ExchangeOverride {
                step: self.step,
                host_var: name.to_string(),
                exchange_field: field.to_string(),
                sign,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Time and Introspection (flow model)
    // ========================================================================

    pub fn current_time(&self) -> Result<f64, CouplingError> {
        self.require_active("current_time")?;
        Ok(self.flow.current_time()?)
    }

    pub fn start_time(&self) -> Result<f64, CouplingError> {
        self.require_active("start_time")?;
        Ok(self.flow.start_time()?)
    }

    pub fn end_time(&self) -> Result<f64, CouplingError> {
        self.require_active("end_time")?;
        Ok(self.flow.end_time()?)
    }

    pub fn get_var_count(&self) -> Result<usize, CouplingError> {
        self.require_active("get_var_count")?;
        Ok(self.flow.field_count()?)
    }

    pub fn get_var_rank(&self, name: &str) -> Result<usize, CouplingError> {
        self.require_active("get_var_rank")?;
        Ok(self.flow.field_rank(name)?)
    }

    pub fn get_var_shape(&self, name: &str) -> Result<Vec<usize>, CouplingError> {
        self.require_active("get_var_shape")?;
        Ok(self.flow.field_shape(name)?)
    }

    pub fn get_var_type(&self, name: &str) -> Result<FieldType, CouplingError> {
        self.require_active("get_var_type")?;
        Ok(self.flow.field_type(name)?)
    }

    // ========================================================================
    // Unsupported extended BMI operations
    // ========================================================================

    pub fn get_var_name(&self, _index: usize) -> Result<String, CouplingError> {
        Err(CouplingError::NotImplemented("get_var_name"))
    }

    pub fn inq_compound(&self, _name: &str) -> Result<usize, CouplingError> {
        Err(CouplingError::NotImplemented("inq_compound"))
    }

    pub fn inq_compound_field(&self, _name: &str, _field: usize) -> Result<String, CouplingError> {
        Err(CouplingError::NotImplemented("inq_compound_field"))
    }

    pub fn set_var_index(
        &mut self,
        _name: &str,
        _indices: &[usize],
        _values: &[f64],
    ) -> Result<(), CouplingError> {
        Err(CouplingError::NotImplemented("set_var_index"))
    }

    pub fn set_var_slice(
        &mut self,
        _name: &str,
        _start: &[usize],
        _count: &[usize],
        _values: &[f64],
    ) -> Result<(), CouplingError> {
        Err(CouplingError::NotImplemented("set_var_slice"))
    }
}
