//! Orchestrator - coupled flow/wave runner
//!
//! Owns both model handles, the exchange channel and the variable map, and
//! exposes a single BMI-style surface over the pair.
//!
//! See `engine.rs` for the stepping protocol.

pub mod config;
pub mod engine;
pub mod session;

// Re-export main types for convenience
pub use config::{compute_config_hash, CouplingConfig, ExchangeConfig, DEFAULT_OUTPUT_DIR_PREFIX};
pub use engine::{CouplingError, Orchestrator, StepResult};
pub use session::CoupledSession;
