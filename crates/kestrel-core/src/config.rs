//! Runtime options
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! initial_step_budget = 100000
//! slice_min_ms = 1000
//! slice_max_ms = 2000
//! slice_target_ms = 1000
//! dump_state = true
//! dump_dir = "/tmp/kestrel"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading options
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the options file
    #[error("Failed to read options: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse options: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Values parse but are inconsistent
    #[error("Invalid options: {0}")]
    ValidationError(String),
}

/// Tunables for one runtime instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmOptions {
    /// Steps per slice before the first measurement
    pub initial_step_budget: u64,

    /// Upper bound for the adaptive step budget
    pub max_step_budget: u64,

    /// Slices shorter than this trigger a rescale (ms)
    pub slice_min_ms: u64,

    /// Slices longer than this trigger a rescale (ms)
    pub slice_max_ms: u64,

    /// Duration a rescaled slice aims for (ms)
    pub slice_target_ms: u64,

    /// Write a state dump when an exception escapes every frame
    pub dump_state: bool,

    /// Directory that receives `core-*.json` dumps
    pub dump_dir: PathBuf,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            initial_step_budget: 100_000,
            max_step_budget: 100_000_000,
            slice_min_ms: 1000,
            slice_max_ms: 2000,
            slice_target_ms: 1000,
            dump_state: false,
            dump_dir: PathBuf::from("."),
        }
    }
}

impl VmOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from TOML text; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let options: VmOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Check that the values describe a usable budget window
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_step_budget == 0 {
            return Err(ConfigError::ValidationError(
                "initial_step_budget must be positive".to_string(),
            ));
        }
        if self.max_step_budget < self.initial_step_budget {
            return Err(ConfigError::ValidationError(format!(
                "max_step_budget ({}) is below initial_step_budget ({})",
                self.max_step_budget, self.initial_step_budget
            )));
        }
        if self.slice_min_ms > self.slice_max_ms {
            return Err(ConfigError::ValidationError(format!(
                "slice window is empty: min {} ms > max {} ms",
                self.slice_min_ms, self.slice_max_ms
            )));
        }
        if self.slice_target_ms == 0 {
            return Err(ConfigError::ValidationError(
                "slice_target_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Lower edge of the slice window
    pub fn slice_min(&self) -> Duration {
        Duration::from_millis(self.slice_min_ms)
    }

    /// Upper edge of the slice window
    pub fn slice_max(&self) -> Duration {
        Duration::from_millis(self.slice_max_ms)
    }

    /// Slice duration a rescale aims for
    pub fn slice_target(&self) -> Duration {
        Duration::from_millis(self.slice_target_ms)
    }
}
