//! Variable Map - host variable name to exchange field translation
//!
//! Each entry maps a flow-model variable to the exchange-file field the
//! wave model reads, together with the sign convention between the two.
//! The map is fixed for the lifetime of an orchestrator.
//!
//! # Example
//!
//! ```rust
//! use dfwr_core_rs::mapping::{Sign, VariableMap, VariableMapping};
//! use dfwr_core_rs::FieldArray;
//!
//! let map = VariableMap::from_entries([(
//!     "bl",
//!     VariableMapping::new("FlowElem_zcc", Sign::Negative),
//! )]);
//!
//! let (field, sign) = map.resolve("bl").unwrap();
//! assert_eq!(field, "FlowElem_zcc");
//!
//! let pushed = VariableMap::apply_sign(sign, &FieldArray::vector(vec![1.0, 2.0, 3.0]));
//! assert_eq!(pushed.values(), &[-1.0, -2.0, -3.0]);
//! assert!(map.resolve("s1").is_none());
//! ```

mod variable_map;

pub use variable_map::{MappingError, Sign, VariableMap, VariableMapping};
