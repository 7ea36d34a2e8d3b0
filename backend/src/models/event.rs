//! Coupling event log
//!
//! Every lifecycle transition, model advance and exchange push the
//! orchestrator performs is recorded as an `Event`. The log is append-only
//! and in memory; it exists so callers and tests can audit the exact call
//! sequence of a coupled run.
//!
//! # Event Types
//!
//! - **Lifecycle**: `Initialized`, `Finalized`
//! - **Stepping**: `Bootstrap`, `ModelAdvanced`
//! - **Exchange**: `ExchangePushed`, `ExchangeOverride`
//!
//! # Example
//!
//! ```rust
//! use dfwr_core_rs::models::{Event, EventLog};
//! use dfwr_core_rs::ModelKind;
//!
//! let mut log = EventLog::new();
//! log.log(Event::ModelAdvanced { step: 1, model: ModelKind::Wave, dt: 60.0 });
//! log.log(Event::ModelAdvanced { step: 1, model: ModelKind::Flow, dt: 60.0 });
//!
//! assert_eq!(log.events_at_step(1).len(), 2);
//! assert_eq!(log.advances_of(ModelKind::Wave), vec![60.0]);
//! ```

use crate::engine::ModelKind;
use crate::mapping::Sign;
use std::path::PathBuf;

/// Coupling event capturing one orchestrator action.
///
/// All events carry the step index they belong to (0 for events outside
/// any `update` call). Events are logged in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Both engines initialized and the exchange file located
    Initialized { exchange_path: PathBuf },

    /// First-step bootstrap branch was taken
    Bootstrap { step: usize },

    /// A model was advanced by `dt` (negative = engine default step)
    ModelAdvanced {
        step: usize,
        model: ModelKind,
        dt: f64,
    },

    /// A flow field was written into the exchange file
    ExchangePushed {
        step: usize,
        host_var: String,
        exchange_field: String,
        sign: Sign,
    },

    /// A `set_var` value was written into the exchange file
    ExchangeOverride {
        step: usize,
        host_var: String,
        exchange_field: String,
        sign: Sign,
    },

    /// Both engines finalized (successfully or not)
    Finalized { step: usize, clean: bool },
}

impl Event {
    /// Step index this event belongs to
    pub fn step(&self) -> usize {
        match self {
            Event::Initialized { .. } => 0,
            Event::Bootstrap { step } => *step,
            Event::ModelAdvanced { step, .. } => *step,
            Event::ExchangePushed { step, .. } => *step,
            Event::ExchangeOverride { step, .. } => *step,
            Event::Finalized { step, .. } => *step,
        }
    }

    /// Short description of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Initialized { .. } => "Initialized",
            Event::Bootstrap { .. } => "Bootstrap",
            Event::ModelAdvanced { .. } => "ModelAdvanced",
            Event::ExchangePushed { .. } => "ExchangePushed",
            Event::ExchangeOverride { .. } => "ExchangeOverride",
            Event::Finalized { .. } => "Finalized",
        }
    }
}

/// Event log for storing and querying coupling events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Get events for a specific step
    pub fn events_at_step(&self, step: usize) -> Vec<&Event> {
        self.events.iter().filter(|e| e.step() == step).collect()
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Step sizes passed to one model, in call order
    pub fn advances_of(&self, model: ModelKind) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::ModelAdvanced { model: m, dt, .. } if *m == model => Some(*dt),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
