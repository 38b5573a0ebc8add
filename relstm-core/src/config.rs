//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RELSTM_CONFIG or --config)
//! 3. Environment variables

use crate::definition::MachineConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default name of the backend resource.
pub const DEFAULT_BACKEND_RESOURCE: &str = "database";

/// Default name of the authentication resource.
pub const DEFAULT_AUTH_RESOURCE: &str = "auth";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backend resource used by machines that do not name one.
    pub default_backend: String,
    /// Static authentication.
    pub auth: AuthConfig,
    /// Machine definitions by type.
    pub machines: BTreeMap<String, MachineConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_backend: DEFAULT_BACKEND_RESOURCE.to_string(),
            auth: AuthConfig::default(),
            machines: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: RuntimeConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("RELSTM_BACKEND") {
            if !backend.is_empty() {
                self.default_backend = backend;
            }
        }

        self.auth.apply_env_overrides();
    }
}

/// Static authentication configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Principal identifiers by accessor name.
    pub principals: BTreeMap<String, Value>,
}

impl AuthConfig {
    fn apply_env_overrides(&mut self) {
        // RELSTM_PRINCIPAL=user_id=42
        if let Ok(principal) = std::env::var("RELSTM_PRINCIPAL") {
            if let Some((accessor, value)) = principal.split_once('=') {
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                self.principals.insert(accessor.to_string(), value);
            }
        }
    }

    /// Returns whether any principal is configured.
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}
