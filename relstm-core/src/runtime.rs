//! Runtime - registry of machine types and the resources they run on.

use crate::auth::{Authenticator, StaticAuthenticator};
use crate::builtin::BuiltinTransition;
use crate::config::{RuntimeConfig, DEFAULT_AUTH_RESOURCE, DEFAULT_BACKEND_RESOURCE};
use crate::definition::MachineConfig;
use crate::error::CoreError;
use crate::identity::Identity;
use crate::invoker::{ActionInvoker, Invocation};
use crate::load::{load_ref, LoadOptions, LoadedRef};
use crate::machine::RelationalMachine;
use crate::reference::Reference;
use crate::transition::{Args, TransitionHandler, TransitionRegistry};
use dashmap::DashMap;
use relstm_query::Backend;
use std::collections::HashMap;
use std::sync::Arc;

/// A named capability machines can be bound to.
#[derive(Clone)]
pub enum Resource {
    Backend(Arc<dyn Backend>),
    Auth(Arc<dyn Authenticator>),
}

impl Resource {
    fn kind(&self) -> &'static str {
        match self {
            Resource::Backend(_) => "backend",
            Resource::Auth(_) => "authenticator",
        }
    }
}

/// Named resources available to machines.
#[derive(Clone)]
pub struct Resources {
    resources: HashMap<String, Resource>,
    default_backend: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            resources: HashMap::new(),
            default_backend: DEFAULT_BACKEND_RESOURCE.to_string(),
        }
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backend used by machines that do not name one.
    pub fn with_default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = name.into();
        self
    }

    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        self.resources.insert(name.into(), Resource::Backend(backend));
        self
    }

    pub fn with_auth(mut self, name: impl Into<String>, auth: Arc<dyn Authenticator>) -> Self {
        self.resources.insert(name.into(), Resource::Auth(auth));
        self
    }

    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Returns the backend resource `name`.
    pub fn backend(&self, name: &str) -> Result<Arc<dyn Backend>, CoreError> {
        match self.get(name)? {
            Resource::Backend(backend) => Ok(Arc::clone(backend)),
            other => Err(wrong_kind(name, "backend", other)),
        }
    }

    /// Returns the authenticator resource `name`.
    pub fn auth(&self, name: &str) -> Result<Arc<dyn Authenticator>, CoreError> {
        match self.get(name)? {
            Resource::Auth(auth) => Ok(Arc::clone(auth)),
            other => Err(wrong_kind(name, "authenticator", other)),
        }
    }

    fn get(&self, name: &str) -> Result<&Resource, CoreError> {
        self.resources
            .get(name)
            .ok_or_else(|| CoreError::configuration(format!("resource '{}' is not available", name)))
    }
}

fn wrong_kind(name: &str, expected: &str, found: &Resource) -> CoreError {
    CoreError::configuration(format!(
        "resource '{}' is a {}, expected a {}",
        name,
        found.kind(),
        expected
    ))
}

/// Registry of machine types.
pub struct Runtime {
    machines: DashMap<String, Arc<RelationalMachine>>,
    transitions: Arc<TransitionRegistry>,
    resources: Resources,
}

impl Runtime {
    pub fn new(resources: Resources) -> Self {
        Self {
            machines: DashMap::new(),
            transitions: Arc::new(TransitionRegistry::new()),
            resources,
        }
    }

    /// Creates a runtime and registers every configured machine.
    ///
    /// Configured principals are exposed as the default authenticator
    /// unless the caller already provides one.
    pub fn from_config(config: &RuntimeConfig, resources: Resources) -> Result<Self, CoreError> {
        let mut resources = resources.with_default_backend(config.default_backend.clone());
        if !config.auth.is_empty() && !resources.contains(DEFAULT_AUTH_RESOURCE) {
            resources = resources.with_auth(
                DEFAULT_AUTH_RESOURCE,
                Arc::new(StaticAuthenticator::from_config(&config.auth)),
            );
        }

        let runtime = Self::new(resources);
        for (machine_type, machine_config) in &config.machines {
            runtime.add_machine(machine_type, machine_config.clone())?;
        }
        Ok(runtime)
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Registers a machine type.
    ///
    /// Returns the definition checksum and whether the machine was newly
    /// added. Re-adding an identical definition is a no-op; a different
    /// definition under the same type is a configuration error.
    pub fn add_machine(
        &self,
        machine_type: &str,
        config: MachineConfig,
    ) -> Result<(String, bool), CoreError> {
        let machine = RelationalMachine::initialize(
            machine_type,
            config,
            &self.resources,
            Arc::clone(&self.transitions),
        )?;
        let checksum = machine.definition().checksum.clone();

        if let Some(existing) = self.machines.get(machine_type) {
            if existing.definition().checksum == checksum {
                return Ok((checksum, false));
            }
            return Err(CoreError::configuration(format!(
                "machine '{}' is already registered with a different definition",
                machine_type
            )));
        }

        for action in machine.definition().actions() {
            if let Some(kind) = action.handler {
                self.transitions.register(
                    machine_type,
                    &action.name,
                    Arc::new(BuiltinTransition::new(kind, action.name.clone())),
                );
            }
        }

        tracing::info!(
            "Registered machine {} on table {} ({} actions)",
            machine_type,
            machine.definition().table,
            machine.definition().actions().count()
        );
        self.machines
            .insert(machine_type.to_string(), Arc::new(machine));
        Ok((checksum, true))
    }

    /// Returns a registered machine.
    pub fn machine(&self, machine_type: &str) -> Result<Arc<RelationalMachine>, CoreError> {
        self.machines
            .get(machine_type)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| CoreError::UnknownMachine {
                machine: machine_type.to_string(),
            })
    }

    /// Lists registered machine types, sorted.
    pub fn list_machines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.machines.iter().map(|m| m.key().clone()).collect();
        names.sort();
        names
    }

    /// Binds business logic to a declared action.
    pub fn register_transition(
        &self,
        machine_type: &str,
        action: &str,
        handler: Arc<dyn TransitionHandler>,
    ) -> Result<(), CoreError> {
        self.machine(machine_type)?.action(action)?;
        self.transitions.register(machine_type, action, handler);
        Ok(())
    }

    pub fn reference(&self, machine_type: &str, id: Identity) -> Result<Reference, CoreError> {
        Ok(self.machine(machine_type)?.reference(id))
    }

    pub fn null_ref(&self, machine_type: &str) -> Result<Reference, CoreError> {
        Ok(self.machine(machine_type)?.null_ref())
    }

    /// Invokes an action through an [`ActionInvoker`].
    pub fn invoke(&self, machine_type: &str, action: &str, args: Args) -> Result<Invocation, CoreError> {
        ActionInvoker::new(self.machine(machine_type)?, action)?.invoke(args)
    }

    /// Loads an instance for display.
    pub fn load_ref(
        &self,
        machine_type: &str,
        id: Identity,
        options: LoadOptions,
    ) -> Result<LoadedRef, CoreError> {
        load_ref(Some(self.reference(machine_type, id)?), options)
    }
}
