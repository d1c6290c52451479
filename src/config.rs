//! Engine configuration.
//!
//! Plain struct with defaults usable directly in tests; binaries load
//! overrides from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, VantageResult};

/// Configuration for the vantage engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Perception retries observed at the state-machine layer before the run
    /// is declared exhausted.
    pub max_perception_retries: usize,
    /// Logic generation rounds (initial synthesis plus feedback-driven
    /// retries) before the run is declared exhausted.
    pub max_feedback_rounds: usize,
    /// Overall step budget per run; a backstop against pathological
    /// reject/reason cycles.
    pub max_steps: usize,
    /// Model gateway endpoint settings.
    pub gateway: GatewayConfig,
}

/// Where the capability gateway lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_perception_retries: 5,
            max_feedback_rounds: 4,
            max_steps: 64,
            gateway: GatewayConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9041".into(),
            timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> VantageResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make every run fail immediately.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid {
                message: "max_steps must be > 0".into(),
            });
        }
        if self.max_feedback_rounds == 0 {
            return Err(ConfigError::Invalid {
                message: "max_feedback_rounds must be > 0".into(),
            });
        }
        Ok(())
    }
}
