//! Simulated machine configuration

use core_types::ids::NENV;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size limits for the simulated machine
///
/// Missing fields take their default values when parsed from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of physical page frames
    pub max_frames: usize,
    /// Number of environment table slots
    pub max_envs: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_frames: 4096,
            max_envs: NENV,
        }
    }
}

impl SimConfig {
    /// Parses and validates a JSON configuration
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the number of physical frames
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Sets the number of environment slots
    pub fn with_max_envs(mut self, max_envs: u32) -> Self {
        self.max_envs = max_envs;
        self
    }

    /// Checks the limits are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames == 0 {
            return Err(ConfigError::Zero("max_frames"));
        }
        if self.max_envs == 0 {
            return Err(ConfigError::Zero("max_envs"));
        }
        if self.max_envs > NENV {
            return Err(ConfigError::TooManyEnvs(self.max_envs));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_envs {0} exceeds the environment table size {}", NENV)]
    TooManyEnvs(u32),
}
