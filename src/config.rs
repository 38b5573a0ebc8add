//! Application configuration: runtime machines plus seeded storage.

use relstm_core::{ConfigError, RuntimeConfig};
use relstm_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Complete configuration of the `relstm` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub runtime: RuntimeConfig,
    /// Tables created in the in-memory backend at startup.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Loads the file at `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.runtime.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Sets a principal from an `accessor=value` pair.
    pub fn set_principal(&mut self, pair: &str) -> Result<(), String> {
        let (accessor, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected accessor=value, got '{}'", pair))?;
        self.runtime
            .auth
            .principals
            .insert(accessor.to_string(), parse_value(value));
        Ok(())
    }
}

/// Parses a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
