//! Run configuration for a coupled flow/wave run
//!
//! Everything the orchestrator needs is carried explicitly in
//! `CouplingConfig`; nothing is read from the process environment.
//!
//! # JSON Layout
//!
//! ```json
//! {
//!   "flow": { "kind": "flow", "config_file": "fm/bay.mdu", "working_dir": "/runs/bay" },
//!   "wave": { "kind": "wave", "config_file": "wave/bay.mdw", "working_dir": "/runs/bay" },
//!   "exchange": { "output_dir_prefix": "DFM_OUTPUT_", "file_pattern": null },
//!   "variables": { "bl": { "exchange_field": "FlowElem_zcc", "sign": -1 } }
//! }
//! ```
//!
//! `exchange` and `variables` are optional; they default to the D-Flow FM
//! output layout and the bed-level mapping.

use crate::engine::{ModelConfig, ModelKind};
use crate::mapping::VariableMap;
use crate::orchestrator::CouplingError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Default prefix of the flow engine's output directory
pub const DEFAULT_OUTPUT_DIR_PREFIX: &str = "DFM_OUTPUT_";

fn default_output_dir_prefix() -> String {
    DEFAULT_OUTPUT_DIR_PREFIX.to_string()
}

/// Where the exchange file is looked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Flow output directory is `<prefix><flow run name>` next to the flow
    /// config file
    #[serde(default = "default_output_dir_prefix")]
    pub output_dir_prefix: String,

    /// Glob pattern inside the output directory. `None` means
    /// `<flow run name>*_com.nc`.
    #[serde(default)]
    pub file_pattern: Option<String>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            output_dir_prefix: default_output_dir_prefix(),
            file_pattern: None,
        }
    }
}

/// Complete configuration of a coupled run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingConfig {
    pub flow: ModelConfig,

    pub wave: ModelConfig,

    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default = "VariableMap::flow_wave_default")]
    pub variables: VariableMap,
}

impl CouplingConfig {
    /// Configuration with default exchange layout and variable map
    pub fn new(flow: ModelConfig, wave: ModelConfig) -> Self {
        Self {
            flow,
            wave,
            exchange: ExchangeConfig::default(),
            variables: VariableMap::flow_wave_default(),
        }
    }

    pub fn with_variables(mut self, variables: VariableMap) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_exchange_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.exchange.file_pattern = Some(pattern.into());
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, CouplingError> {
        let config: CouplingConfig = serde_json::from_str(json)
            .map_err(|e| CouplingError::InvalidConfig(format!("Config parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CouplingError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CouplingError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), CouplingError> {
        for (expected, model) in [(ModelKind::Flow, &self.flow), (ModelKind::Wave, &self.wave)] {
            if model.kind != expected {
                return Err(CouplingError::InvalidConfig(format!(
                    "{} slot holds a {} model config",
                    expected, model.kind
                )));
            }
            if model.config_file.as_os_str().is_empty() {
                return Err(CouplingError::InvalidConfig(format!(
                    "{} config_file must not be empty",
                    expected
                )));
            }
        }

        if self.flow.run_name().is_none() {
            return Err(CouplingError::InvalidConfig(
                "flow config_file has no file name".to_string(),
            ));
        }

        if let Some(pattern) = &self.exchange.file_pattern {
            if pattern.trim().is_empty() {
                return Err(CouplingError::InvalidConfig(
                    "exchange file_pattern must not be empty".to_string(),
                ));
            }
        }

        for (host_var, mapping) in self.variables.iter() {
            if host_var.is_empty() || mapping.exchange_field.is_empty() {
                return Err(CouplingError::InvalidConfig(format!(
                    "variable mapping '{}' -> '{}' has an empty name",
                    host_var, mapping.exchange_field
                )));
            }
        }

        Ok(())
    }

    /// Flow output directory the exchange file is searched in
    pub fn exchange_search_root(&self) -> Result<PathBuf, CouplingError> {
        self.flow
            .output_dir(&self.exchange.output_dir_prefix)
            .ok_or_else(|| CouplingError::InvalidConfig("flow config_file has no file name".into()))
    }

    /// Glob pattern for the exchange file
    pub fn exchange_pattern(&self) -> Result<String, CouplingError> {
        if let Some(pattern) = &self.exchange.file_pattern {
            return Ok(pattern.clone());
        }
        let name = self
            .flow
            .run_name()
            .ok_or_else(|| CouplingError::InvalidConfig("flow config_file has no file name".into()))?;
        Ok(format!("{}*_com.nc", glob::Pattern::escape(&name)))
    }
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute deterministic SHA256 hash of config
///
/// Uses canonical JSON serialization with sorted keys, so the hash does not
/// depend on map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, CouplingError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config).map_err(|e| {
        CouplingError::SerializationError(format!("Config serialization failed: {}", e))
    })?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value)).map_err(|e| {
        CouplingError::SerializationError(format!("Config serialization failed: {}", e))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Sign, VariableMapping};

    fn config() -> CouplingConfig {
        CouplingConfig::new(
            ModelConfig::new(ModelKind::Flow, "fm/bay.mdu", "/runs/bay"),
            ModelConfig::new(ModelKind::Wave, "wave/bay.mdw", "/runs/bay"),
        )
    }

    #[test]
    fn test_default_pattern_uses_flow_run_name() {
        assert_eq!(config().exchange_pattern().unwrap(), "bay*_com.nc");
        assert_eq!(
            config().exchange_search_root().unwrap(),
            PathBuf::from("/runs/bay/fm/DFM_OUTPUT_bay")
        );
    }

    #[test]
    fn test_pattern_override_wins() {
        let cfg = config().with_exchange_pattern("*_com.nc");
        assert_eq!(cfg.exchange_pattern().unwrap(), "*_com.nc");
    }

    #[test]
    fn test_swapped_kinds_are_rejected() {
        let mut cfg = config();
        std::mem::swap(&mut cfg.flow, &mut cfg.wave);
        assert!(matches!(cfg.validate(), Err(CouplingError::InvalidConfig(_))));
    }

    #[test]
    fn test_compute_config_hash_deterministic() {
        assert_eq!(
            compute_config_hash(&config()).unwrap(),
            compute_config_hash(&config()).unwrap()
        );
    }

    #[test]
    fn test_compute_config_hash_different_for_different_configs() {
        let other = config().with_variables(VariableMap::from_entries([(
            "bl",
            VariableMapping::new("FlowElem_zcc", Sign::Positive),
        )]));
        assert_ne!(
            compute_config_hash(&config()).unwrap(),
            compute_config_hash(&other).unwrap()
        );
    }
}
