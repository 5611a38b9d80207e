//! Compiler configuration
//!
//! Read from a JSON file; every field has a default, so `{}` is a valid
//! configuration.

use crate::raise::RaiseOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Query-level timing applied to panels without their own override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTiming {
    #[default]
    Any,
    SameInstance,
}

impl QueryTiming {
    pub fn is_same_instance(&self) -> bool {
        matches!(self, QueryTiming::SameInstance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub query_timing: QueryTiming,
    /// Re-wrap raised top-level leaves as `AND(OR(leaf))`
    pub normalize_raised_selection: bool,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            query_timing: QueryTiming::Any,
            normalize_raised_selection: true,
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error in config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Validation(String),
}

impl CompilerConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let config: CompilerConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Validation("log_filter must not be empty".into()));
        }
        EnvFilter::try_new(&self.log_filter).map_err(|e| {
            ConfigError::Validation(format!(
                "log_filter {:?} is not a valid filter: {}",
                self.log_filter, e
            ))
        })?;
        Ok(())
    }

    pub fn raise_options(&self) -> RaiseOptions {
        RaiseOptions {
            normalize: self.normalize_raised_selection,
        }
    }
}
