//! References to machine instances.
//!
//! A reference is a lightweight handle: the machine plus an identity. State
//! and properties are loaded on first access and cached until the reference
//! is invalidated, which happens after every invocation through it.

use crate::error::CoreError;
use crate::identity::Identity;
use crate::machine::RelationalMachine;
use crate::transition::{ActionValue, Args};
use relstm_query::Row;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Hydration<T> {
    Unloaded,
    Loaded(T),
}

impl<T> Hydration<T> {
    fn is_loaded(&self) -> bool {
        matches!(self, Hydration::Loaded(_))
    }
}

/// Handle to one instance of a machine type.
#[derive(Clone)]
pub struct Reference {
    machine: Arc<RelationalMachine>,
    id: Identity,
    state: Hydration<String>,
    properties: Hydration<Row>,
}

impl Reference {
    pub(crate) fn new(machine: Arc<RelationalMachine>, id: Identity) -> Self {
        Self {
            machine,
            id,
            state: Hydration::Unloaded,
            properties: Hydration::Unloaded,
        }
    }

    /// Creates a reference whose state and properties are already known.
    pub(crate) fn preloaded(
        machine: Arc<RelationalMachine>,
        id: Identity,
        state: String,
        properties: Row,
    ) -> Self {
        Self {
            machine,
            id,
            state: Hydration::Loaded(state),
            properties: Hydration::Loaded(properties),
        }
    }

    pub fn machine_type(&self) -> &str {
        self.machine.machine_type()
    }

    pub fn id(&self) -> &Identity {
        &self.id
    }

    pub fn machine(&self) -> &Arc<RelationalMachine> {
        &self.machine
    }

    /// Returns true if the reference points to no instance.
    pub fn is_null_ref(&self) -> bool {
        self.id.is_empty()
    }

    /// Returns the instance state, loading it on first access.
    pub fn state(&mut self) -> Result<&str, CoreError> {
        if !self.state.is_loaded() {
            let state = self.machine.get_state(&self.id)?;
            self.state = Hydration::Loaded(state);
        }
        match &self.state {
            Hydration::Loaded(state) => Ok(state),
            Hydration::Unloaded => Ok(""),
        }
    }

    /// Returns the instance properties, loading them on first access.
    pub fn properties(&mut self) -> Result<&Row, CoreError> {
        if !self.properties.is_loaded() {
            let (properties, state) = self.machine.get_properties(&self.id)?;
            if let Some(state) = state {
                self.state = Hydration::Loaded(state);
            }
            self.properties = Hydration::Loaded(properties);
        }
        match &self.properties {
            Hydration::Loaded(properties) => Ok(properties),
            Hydration::Unloaded => Err(CoreError::NotFound {
                machine: self.machine_type().to_string(),
                id: self.id.to_string(),
            }),
        }
    }

    pub fn is_state_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    pub fn is_properties_loaded(&self) -> bool {
        self.properties.is_loaded()
    }

    /// Drops cached state and properties.
    pub fn invalidate(&mut self) {
        self.state = Hydration::Unloaded;
        self.properties = Hydration::Unloaded;
    }

    /// Returns an unloaded copy of this reference.
    pub fn fresh(&self) -> Self {
        Self::new(Arc::clone(&self.machine), self.id.clone())
    }

    /// Invokes an action with this reference as the target.
    ///
    /// Cached data is dropped afterwards whether or not the action
    /// succeeded.
    pub fn invoke(&mut self, action: &str, args: &Args) -> Result<ActionValue, CoreError> {
        let handler = self.machine.transition_handler(action)?;
        let result = handler.call(self, args);
        self.invalidate();
        result
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("machine_type", &self.machine_type())
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.machine_type() == other.machine_type() && self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::MachineConfig;
    use crate::runtime::Resources;
    use crate::transition::TransitionRegistry;
    use relstm_query::Backend;
    use relstm_storage::{ColumnDef, MemoryBackend};
    use serde_json::json;

    fn setup() -> (Arc<MemoryBackend>, Arc<RelationalMachine>, Arc<TransitionRegistry>) {
        let backend = MemoryBackend::new();
        backend
            .create_table(
                "tickets",
                vec![
                    ColumnDef::new("id", "integer").primary_key().auto_increment(),
                    ColumnDef::new("state", "text"),
                    ColumnDef::new("title", "text"),
                ],
            )
            .unwrap();
        backend
            .insert(
                "tickets",
                serde_json::from_value(json!({"state": "open", "title": "First"})).unwrap(),
            )
            .unwrap();
        backend.reset_query_count();
        let backend = Arc::new(backend);

        let config: MachineConfig = serde_json::from_value(json!({
            "table": "tickets",
            "actions": {"close": {}}
        }))
        .unwrap();
        let resources = Resources::new().with_backend("database", backend.clone());
        let registry = Arc::new(TransitionRegistry::new());
        let machine =
            RelationalMachine::initialize("ticket", config, &resources, Arc::clone(&registry)).unwrap();
        backend.reset_query_count();
        (backend, Arc::new(machine), registry)
    }

    #[test]
    fn test_state_loaded_once() {
        let (backend, machine, _) = setup();
        let mut reference = machine.reference(Identity::single(1));

        assert!(!reference.is_state_loaded());
        assert_eq!(reference.state().unwrap(), "open");
        assert_eq!(reference.state().unwrap(), "open");
        assert_eq!(backend.query_count(), 1);
    }

    #[test]
    fn test_properties_coload_state() {
        let (backend, machine, _) = setup();
        let mut reference = machine.reference(Identity::single(1));

        assert_eq!(reference.properties().unwrap()["title"], json!("First"));
        assert!(reference.is_state_loaded());
        assert_eq!(reference.state().unwrap(), "open");
        assert_eq!(backend.query_count(), 1);
    }

    #[test]
    fn test_null_ref_skips_backend() {
        let (backend, machine, _) = setup();
        let mut reference = machine.null_ref();

        assert!(reference.is_null_ref());
        assert_eq!(reference.state().unwrap(), "");
        assert!(matches!(
            reference.properties(),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(backend.query_count(), 0);
    }

    #[test]
    fn test_invalidate_and_fresh() {
        let (backend, machine, _) = setup();
        let mut reference = machine.reference(Identity::single(1));
        reference.state().unwrap();

        let fresh = reference.fresh();
        assert!(!fresh.is_state_loaded());
        assert_eq!(fresh, reference);

        backend
            .update(
                "tickets",
                &[relstm_query::Predicate::eq("id", 1)],
                serde_json::from_value(json!({"state": "closed"})).unwrap(),
            )
            .unwrap();
        assert_eq!(reference.state().unwrap(), "open");
        reference.invalidate();
        assert_eq!(reference.state().unwrap(), "closed");
    }

    #[test]
    fn test_invoke_invalidates() {
        let (_, machine, registry) = setup();
        registry.register(
            "ticket",
            "close",
            Arc::new(|target: &mut Reference, _args: &Args| -> Result<ActionValue, CoreError> {
                let filter = target.machine().primary_key_predicates(target.id())?;
                target.machine().backend().update(
                    "tickets",
                    &filter,
                    serde_json::from_value(json!({"state": "closed"}))?,
                )?;
                Ok(ActionValue::from(true))
            }),
        );

        let mut reference = machine.reference(Identity::single(1));
        assert_eq!(reference.state().unwrap(), "open");

        let result = reference.invoke("close", &Args::new()).unwrap();
        assert!(result.is_done());
        assert!(!reference.is_state_loaded());
        assert_eq!(reference.state().unwrap(), "closed");
    }

    #[test]
    fn test_invoke_unknown_action() {
        let (_, machine, _) = setup();
        let mut reference = machine.reference(Identity::single(1));

        assert!(matches!(
            reference.invoke("close", &Args::new()),
            Err(CoreError::UnknownAction { .. })
        ));
    }
}
