//! Core value types shared across the runner

pub mod lifecycle;

pub use lifecycle::LifecyclePhase;
