//! Transition handlers and their registry.
//!
//! Business logic lives in handlers registered per `(machine type, action)`.
//! A handler receives the target reference and the action arguments and
//! returns a value or a failure. Each backend statement is atomic; a
//! handler doing read-modify-write across several statements must provide
//! its own isolation (a backend transaction or locking clause).

use crate::error::CoreError;
use crate::reference::Reference;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named action argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Ref(Reference),
}

impl Arg {
    /// Returns the plain value, if this is not a reference.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Ref(_) => None,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Reference> for Arg {
    fn from(reference: Reference) -> Self {
        Arg::Ref(reference)
    }
}

/// Action arguments by name.
pub type Args = BTreeMap<String, Arg>;

/// Value returned by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionValue {
    Value(Value),
    Ref(Reference),
}

impl ActionValue {
    /// Returns true if the transition reports it did something.
    ///
    /// A reference counts as done unless it is a null reference.
    pub fn is_done(&self) -> bool {
        match self {
            ActionValue::Ref(r) => !r.is_null_ref(),
            ActionValue::Value(v) => is_truthy(v),
        }
    }

    /// Returns member `key` of a map return value, or null.
    pub fn get(&self, key: &str) -> Value {
        match self {
            ActionValue::Value(Value::Object(map)) => map.get(key).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

impl From<Value> for ActionValue {
    fn from(value: Value) -> Self {
        ActionValue::Value(value)
    }
}

impl From<bool> for ActionValue {
    fn from(value: bool) -> Self {
        ActionValue::Value(Value::Bool(value))
    }
}

impl From<Reference> for ActionValue {
    fn from(reference: Reference) -> Self {
        ActionValue::Ref(reference)
    }
}

/// Truthiness of a JSON value: null, false, zero and empty values are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Business logic of one action.
pub trait TransitionHandler: Send + Sync {
    fn call(&self, target: &mut Reference, args: &Args) -> Result<ActionValue, CoreError>;
}

impl<F> TransitionHandler for F
where
    F: Fn(&mut Reference, &Args) -> Result<ActionValue, CoreError> + Send + Sync,
{
    fn call(&self, target: &mut Reference, args: &Args) -> Result<ActionValue, CoreError> {
        self(target, args)
    }
}

/// Handlers indexed by `(machine type, action)`.
#[derive(Default)]
pub struct TransitionRegistry {
    handlers: DashMap<(String, String), Arc<dyn TransitionHandler>>,
}

impl TransitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one.
    pub fn register(
        &self,
        machine_type: &str,
        action: &str,
        handler: Arc<dyn TransitionHandler>,
    ) {
        self.handlers
            .insert((machine_type.to_string(), action.to_string()), handler);
    }

    pub fn get(&self, machine_type: &str, action: &str) -> Option<Arc<dyn TransitionHandler>> {
        self.handlers
            .get(&(machine_type.to_string(), action.to_string()))
            .map(|r| r.value().clone())
    }

    pub fn contains(&self, machine_type: &str, action: &str) -> bool {
        self.handlers
            .contains_key(&(machine_type.to_string(), action.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!({"id": 1})));
    }

    #[test]
    fn test_action_value_get() {
        let value = ActionValue::from(json!({"id": 42, "ok": true}));
        assert_eq!(value.get("id"), json!(42));
        assert_eq!(value.get("missing"), Value::Null);
        assert_eq!(ActionValue::from(true).get("id"), Value::Null);
    }

    #[test]
    fn test_registry() {
        let registry = TransitionRegistry::new();
        assert!(registry.is_empty());

        registry.register(
            "order",
            "noop",
            Arc::new(|_: &mut Reference, _: &Args| {
                Ok::<_, CoreError>(ActionValue::from(true))
            }),
        );

        assert!(registry.contains("order", "noop"));
        assert!(!registry.contains("invoice", "noop"));
        assert!(registry.get("order", "noop").is_some());
        assert_eq!(registry.len(), 1);
    }
}
