use crate::models::FieldArray;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or validating a variable map
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("Sign must be 1 or -1, got {0}")]
    InvalidSign(i64),

    #[error("Variable '{host_var}' maps to exchange field '{exchange_field}', which the exchange file does not contain")]
    UnknownExchangeField {
        host_var: String,
        exchange_field: String,
    },
}

/// Sign convention between a host variable and its exchange field
///
/// Serialized as the integers `1` and `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(self) -> f64 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }

    /// Element-wise sign application
    pub fn apply(self, values: &FieldArray) -> FieldArray {
        match self {
            Sign::Positive => values.clone(),
            Sign::Negative => values.negated(),
        }
    }
}

impl TryFrom<i64> for Sign {
    type Error = MappingError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Sign::Positive),
            -1 => Ok(Sign::Negative),
            other => Err(MappingError::InvalidSign(other)),
        }
    }
}

impl From<Sign> for i64 {
    fn from(sign: Sign) -> Self {
        match sign {
            Sign::Positive => 1,
            Sign::Negative => -1,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sign::Positive => "+1",
            Sign::Negative => "-1",
        })
    }
}

/// Target of one map entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMapping {
    /// Field name inside the exchange file
    pub exchange_field: String,

    /// Sign applied when copying host values into the exchange file
    pub sign: Sign,
}

impl VariableMapping {
    pub fn new(exchange_field: impl Into<String>, sign: Sign) -> Self {
        Self {
            exchange_field: exchange_field.into(),
            sign,
        }
    }
}

/// Static host-variable to exchange-field map
///
/// Entries iterate in host-variable name order, so exchange pushes happen
/// in a deterministic sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableMap {
    entries: BTreeMap<String, VariableMapping>,
}

impl VariableMap {
    pub fn new(entries: BTreeMap<String, VariableMapping>) -> Self {
        Self { entries }
    }

    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, VariableMapping)>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Bed level: stored depth-positive in the exchange file, so the flow
    /// model's `bl` is pushed to `FlowElem_zcc` negated.
    pub fn flow_wave_default() -> Self {
        Self::from_entries([("bl", VariableMapping::new("FlowElem_zcc", Sign::Negative))])
    }

    /// Exchange field and sign for `host_var`, if mapped
    pub fn resolve(&self, host_var: &str) -> Option<(&str, Sign)> {
        self.entries
            .get(host_var)
            .map(|m| (m.exchange_field.as_str(), m.sign))
    }

    pub fn apply_sign(sign: Sign, values: &FieldArray) -> FieldArray {
        sign.apply(values)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableMapping)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every mapped exchange field against the fields the exchange
    /// file actually holds. Fails on the first missing field (in host
    /// variable order).
    pub fn validate_fields(&self, available: &BTreeSet<String>) -> Result<(), MappingError> {
        for (host_var, mapping) in &self.entries {
            if !available.contains(&mapping.exchange_field) {
                return Err(MappingError::UnknownExchangeField {
                    host_var: host_var.clone(),
                    exchange_field: mapping.exchange_field.clone(),
                });
            }
        }
        Ok(())
    }
}
