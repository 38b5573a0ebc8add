//! Authentication capability.
//!
//! Machines that declare an owner column ask an [`Authenticator`] for the
//! current principal through a named accessor. Without an owner column the
//! authenticator is never consulted and reads are open.

use crate::config::AuthConfig;
use crate::error::CoreError;
use serde_json::Value;
use std::collections::HashMap;

/// Resolves the current principal.
pub trait Authenticator: Send + Sync {
    /// Returns the principal identifier exposed by `accessor`.
    fn principal(&self, accessor: &str) -> Result<Value, CoreError>;
}

/// Authenticator answering from a fixed accessor table.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    principals: HashMap<String, Value>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an authenticator from configuration.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            principals: config
                .principals
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Sets the value returned by `accessor`.
    pub fn with(mut self, accessor: impl Into<String>, principal: impl Into<Value>) -> Self {
        self.principals.insert(accessor.into(), principal.into());
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn principal(&self, accessor: &str) -> Result<Value, CoreError> {
        self.principals.get(accessor).cloned().ok_or_else(|| {
            CoreError::configuration(format!("unknown authentication accessor '{}'", accessor))
        })
    }
}
