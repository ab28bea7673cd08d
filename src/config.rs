//! Engine configuration.
//!
//! One section per component. Every field has a default, so a YAML file only
//! needs the knobs it changes:
//!
//! ```yaml
//! registry:
//!   num_priorities: 3
//! dispatcher:
//!   epsilon_max: 0.1
//! cycle:
//!   coordinator_id: coordinator-eu-1
//!   seed: 42
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::affinity::AffinityConfig;
use crate::dispatching::DispatcherConfig;
use crate::error::{Error, Result};
use crate::health::{DesirabilityConfig, MetricStoreConfig};
use crate::ranking::{RankerConfig, StageCostConfig};
use crate::registry::RegistryConfig;
use crate::scheduler::CycleConfig;
use crate::validation::validate_config;

/// Configuration of every scheduling component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub registry: RegistryConfig,
    pub ranker: RankerConfig,
    pub stage_cost: StageCostConfig,
    pub affinity: AffinityConfig,
    pub metric_store: MetricStoreConfig,
    pub desirability: DesirabilityConfig,
    pub dispatcher: DispatcherConfig,
    pub cycle: CycleConfig,
}

impl EngineConfig {
    /// Reads, parses and validates a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&content)?;
        tracing::info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Parses and validates YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns [`Error::Config`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        validate_config(self).map_err(Error::Config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
