//! Python bindings
//!
//! - `engine`: Python BMI objects as [`crate::engine::BmiEngine`]s
//! - `orchestrator`: the `CoupledRunner` class
//! - `types`: dict/array conversion and error mapping

pub mod engine;
pub mod orchestrator;
pub mod types;
