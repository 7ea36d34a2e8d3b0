//! Lifecycle phases for engines and the coupled orchestrator
//!
//! Both a single model handle and the orchestrator move through the same
//! four phases. No transition skips a phase and nothing leaves `Finalized`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a model handle or of the orchestrator
///
/// # Example
/// ```
/// use dfwr_core_rs::LifecyclePhase;
///
/// let phase = LifecyclePhase::Uninitialized;
/// assert!(!phase.is_active());
/// assert!(LifecyclePhase::Running.is_active());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecyclePhase {
    /// Constructed, `initialize()` not yet called
    #[default]
    Uninitialized,
    /// `initialize()` completed, no step taken yet
    Initialized,
    /// At least one step taken
    Running,
    /// `finalize()` called; terminal
    Finalized,
}

impl LifecyclePhase {
    /// True while stepping and data access are allowed
    /// (`Initialized` or `Running`).
    pub fn is_active(self) -> bool {
        matches!(self, LifecyclePhase::Initialized | LifecyclePhase::Running)
    }

    /// True once `finalize()` has been called.
    pub fn is_finalized(self) -> bool {
        self == LifecyclePhase::Finalized
    }

    /// Phase name as used in log output and error messages
    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Uninitialized => "uninitialized",
            LifecyclePhase::Initialized => "initialized",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Finalized => "finalized",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
