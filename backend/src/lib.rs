//! DFWR Core - coupled flow/wave model runner
//!
//! Runs a hydrodynamic (flow) engine and a spectral wave engine as one
//! BMI-style model. Flow state reaches the wave engine through an exchange
//! file owned by the flow engine.
//!
//! # Architecture
//!
//! - **core**: Lifecycle phases
//! - **models**: Domain types (FieldArray, Event log)
//! - **engine**: BMI engine contract, model handles, in-memory engine
//! - **exchange**: Exchange-file discovery and whole-field rewrites
//! - **mapping**: Host variable to exchange field translation
//! - **orchestrator**: Configuration and the coupled stepping loop
//!
//! # Critical Invariants
//!
//! 1. Within a step the wave model always advances before the flow model
//! 2. The bootstrap branch runs at most once per run
//! 3. Exchange rewrites touch only the targeted field and the
//!    `coordinates` attribute
//! 4. `finalize` attempts both engines even when the first one fails

// Module declarations
pub mod core;
pub mod engine;
pub mod exchange;
pub mod mapping;
pub mod models;
pub mod orchestrator;

// Re-exports for convenience
pub use crate::core::LifecyclePhase;
pub use engine::{BmiEngine, EngineError, ModelConfig, ModelError, ModelHandle, ModelKind};
pub use exchange::{ChannelError, ExchangeChannel};
pub use mapping::{MappingError, Sign, VariableMap, VariableMapping};
pub use models::{
    event::{Event, EventLog},
    field::{FieldArray, FieldType},
};
pub use orchestrator::{
    CoupledSession, CouplingConfig, CouplingError, ExchangeConfig, Orchestrator, StepResult,
};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn dfwr_core_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::orchestrator::PyCoupledRunner>()?;
    Ok(())
}
