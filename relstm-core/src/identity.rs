//! Instance identity.
//!
//! An identity is the ordered tuple of primary key values. The empty
//! identity denotes "no instance" and is what null references carry.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Ordered primary key values of one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Vec<Value>);

impl Identity {
    /// Creates an identity from components in key order.
    pub fn new(components: Vec<Value>) -> Self {
        Self(components)
    }

    /// The empty identity.
    pub fn null() -> Self {
        Self(Vec::new())
    }

    /// Identity of a single-column key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Creates an identity from components tagged with their key position.
    /// Components may arrive in any order, but the positions must be exactly
    /// `0..n` with no repeats.
    pub fn from_indexed(
        components: impl IntoIterator<Item = (usize, Value)>,
    ) -> Result<Self, CoreError> {
        let mut components: Vec<(usize, Value)> = components.into_iter().collect();
        components.sort_by_key(|(i, _)| *i);
        for (expected, (index, _)) in components.iter().enumerate() {
            if *index != expected {
                return Err(CoreError::invalid_identity(if *index < expected {
                    format!("duplicate key position {}", index)
                } else {
                    format!("missing key position {}", expected)
                }));
            }
        }
        Ok(Self(components.into_iter().map(|(_, v)| v).collect()))
    }

    /// Converts a positional JSON value into an identity.
    ///
    /// `null` is the empty identity, an array lists components in order, an
    /// object with numeric keys is sorted by key, and any other scalar is a
    /// single component. Objects keyed by column name need the key columns
    /// and are resolved by the machine instead.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        match value {
            Value::Null => Ok(Self::null()),
            Value::Array(items) => Ok(Self(items.clone())),
            Value::Object(map) => {
                let mut indexed = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let index = k.parse::<usize>().map_err(|_| {
                        CoreError::invalid_identity(format!("non-positional key '{}'", k))
                    })?;
                    indexed.push((index, v.clone()));
                }
                Self::from_indexed(indexed)
            }
            other => Ok(Self::single(other.clone())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> &[Value] {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.0.clone())
    }
}

impl From<Vec<Value>> for Identity {
    fn from(components: Vec<Value>) -> Self {
        Self(components)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
