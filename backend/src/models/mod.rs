//! Domain models for the coupled runner

pub mod event;
pub mod field;

// Re-exports
pub use event::{Event, EventLog};
pub use field::{element_count, shape_from_dims, FieldArray, FieldError, FieldType};
