//config.rs
//! Network configuration: resource limits and constraint weight overrides.
//!
//! ```
//! use scorenet::NetworkConfig;
//!
//! let config = NetworkConfig::from_toml_str(r#"
//!     max_tuples = 50000
//!
//!     [constraint_weights]
//!     "Room conflict" = 2.0
//! "#).unwrap();
//!
//! assert_eq!(config.max_tuples, 50_000);
//! assert_eq!(config.weight_override("Room conflict"), Some(2.0));
//! ```

use crate::error::{Result, ScorenetError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NetworkConfig {
    /// Maximum number of live tuples in the network
    pub max_tuples: usize,
    /// Maximum operations executed by a single flush
    pub max_operations_per_flush: usize,
    /// Capacity reserved up front for the tuple arena and dirty queues
    pub initial_queue_capacity: usize,
    /// Multipliers applied to each constraint's base weight, by constraint name
    pub constraint_weights: BTreeMap<String, f64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_tuples: 10_000_000,
            max_operations_per_flush: 10_000_000,
            initial_queue_capacity: 64,
            constraint_weights: BTreeMap::new(),
        }
    }
}

impl NetworkConfig {
    /// Limits for small problems and tests
    pub fn conservative() -> Self {
        Self {
            max_tuples: 100_000,
            max_operations_per_flush: 1_000_000,
            initial_queue_capacity: 16,
            ..Self::default()
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_tuples: usize::MAX,
            max_operations_per_flush: usize::MAX,
            initial_queue_capacity: 1024,
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_constraint_weight(mut self, name: impl Into<String>, multiplier: f64) -> Self {
        self.constraint_weights.insert(name.into(), multiplier);
        self
    }

    pub fn weight_override(&self, constraint_name: &str) -> Option<f64> {
        self.constraint_weights.get(constraint_name).copied()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tuples == 0 {
            return Err(ScorenetError::config("max_tuples must be positive"));
        }
        if self.max_operations_per_flush == 0 {
            return Err(ScorenetError::config("max_operations_per_flush must be positive"));
        }
        if let Some((name, weight)) = self
            .constraint_weights
            .iter()
            .find(|(_, weight)| !weight.is_finite())
        {
            return Err(ScorenetError::config(format!(
                "weight of constraint '{}' is not finite: {}",
                name, weight
            )));
        }
        Ok(())
    }

    pub fn check_operation_limit(&self, current_ops: usize) -> Result<()> {
        if current_ops > self.max_operations_per_flush {
            return Err(ScorenetError::resource_limit(
                "operations_per_flush",
                format!("Current: {}, Limit: {}", current_ops, self.max_operations_per_flush),
            ));
        }
        Ok(())
    }
}
