//! Relational machine - binds a machine definition to a backend table.
//!
//! Every read is built from small query steps (`add_from`,
//! `add_state_select`, `add_properties_select`, `add_primary_key_where`,
//! `add_permission_condition`) so that the way state is selected stays a
//! property of the definition rather than of the engine.

use crate::auth::Authenticator;
use crate::config::DEFAULT_AUTH_RESOURCE;
use crate::definition::{ActionDefinition, MachineConfig, MachineDefinition, STATE_ALIAS};
use crate::error::{CoreError, TransitionFailure};
use crate::identity::Identity;
use crate::listing::Listing;
use crate::reference::Reference;
use crate::runtime::Resources;
use crate::transition::{TransitionHandler, TransitionRegistry};
use relstm_query::{Backend, Predicate, Projection, Row, SelectQuery};
use serde_json::Value;
use std::sync::Arc;

/// Row cap applied to every listing.
pub const DEFAULT_LISTING_LIMIT: usize = 100;

/// Failure kind raised when an action is not allowed from the current state.
pub const INVALID_TRANSITION: &str = "invalid_transition";

/// Failure kind raised when the principal does not own the instance.
pub const FORBIDDEN: &str = "forbidden";

/// A state machine type persisted as rows of one table.
pub struct RelationalMachine {
    definition: MachineDefinition,
    backend: Arc<dyn Backend>,
    auth: Option<Arc<dyn Authenticator>>,
    transitions: Arc<TransitionRegistry>,
}

impl RelationalMachine {
    /// Creates a machine from already resolved parts.
    pub fn new(
        definition: MachineDefinition,
        backend: Arc<dyn Backend>,
        auth: Option<Arc<dyn Authenticator>>,
        transitions: Arc<TransitionRegistry>,
    ) -> Self {
        Self {
            definition,
            backend,
            auth,
            transitions,
        }
    }

    /// Resolves resources and the schema of a configured machine.
    ///
    /// Properties and key columns are introspected from the table when the
    /// configuration declares no properties.
    pub fn initialize(
        machine_type: &str,
        config: MachineConfig,
        resources: &Resources,
        transitions: Arc<TransitionRegistry>,
    ) -> Result<Self, CoreError> {
        let backend_name = config
            .backend
            .clone()
            .unwrap_or_else(|| resources.default_backend().to_string());
        let backend = resources.backend(&backend_name)?;

        let auth = match config.auth.as_deref() {
            Some(name) => Some(resources.auth(name)?),
            None if config.has_owner() => Some(resources.auth(DEFAULT_AUTH_RESOURCE)?),
            None => None,
        };

        let columns = if config.properties.is_empty() {
            tracing::debug!(
                "Introspecting table {} for machine {}",
                config.table,
                machine_type
            );
            let columns = backend.columns(&config.table).map_err(|e| {
                CoreError::configuration(format!(
                    "cannot introspect table '{}' of machine '{}': {}",
                    config.table, machine_type, e
                ))
            })?;
            Some(columns)
        } else {
            None
        };

        let definition = MachineDefinition::from_config(machine_type, config, columns)?;
        Ok(Self::new(definition, backend, auth, transitions))
    }

    pub fn machine_type(&self) -> &str {
        &self.definition.machine_type
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Returns an action definition.
    pub fn action(&self, name: &str) -> Result<&ActionDefinition, CoreError> {
        self.definition
            .action(name)
            .ok_or_else(|| CoreError::UnknownAction {
                machine: self.machine_type().to_string(),
                action: name.to_string(),
            })
    }

    /// Returns the handler bound to a declared action.
    pub fn transition_handler(&self, action: &str) -> Result<Arc<dyn TransitionHandler>, CoreError> {
        self.action(action)?;
        self.transitions
            .get(self.machine_type(), action)
            .ok_or_else(|| CoreError::UnknownAction {
                machine: self.machine_type().to_string(),
                action: action.to_string(),
            })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Describes the primary key: column names in canonical ID order.
    ///
    /// Falls back to backend key metadata when the definition does not name
    /// key columns; the result is memoized on the definition.
    pub fn describe_id(&self) -> Result<Vec<String>, CoreError> {
        if let Some(pk) = self.definition.pk_columns() {
            return Ok(pk);
        }

        let pk = self.backend.primary_key(&self.definition.table)?;
        tracing::debug!(
            "Resolved primary key of {} from table {}: {:?}",
            self.machine_type(),
            self.definition.table,
            pk
        );
        self.definition.memoize_pk_columns(pk)
    }

    /// Converts a JSON value into an identity of this machine.
    ///
    /// Besides the positional forms of [`Identity::from_value`], an object
    /// keyed by column names is ordered by the key columns.
    pub fn identity(&self, value: &Value) -> Result<Identity, CoreError> {
        match value {
            Value::Object(map) if map.keys().any(|k| k.parse::<usize>().is_err()) => {
                self.identity_from_named(map)
            }
            other => Identity::from_value(other),
        }
    }

    /// Orders named key components by the key columns.
    pub fn identity_from_named(
        &self,
        components: &serde_json::Map<String, Value>,
    ) -> Result<Identity, CoreError> {
        let pk = self.describe_id()?;
        if components.len() != pk.len() {
            return Err(CoreError::invalid_identity(format!(
                "expected key columns {:?}, got {:?}",
                pk,
                components.keys().collect::<Vec<_>>()
            )));
        }
        pk.iter()
            .map(|column| {
                components.get(column).cloned().ok_or_else(|| {
                    CoreError::invalid_identity(format!("missing key column '{}'", column))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Identity::new)
    }

    /// Extracts the identity of a fetched row.
    pub fn identity_of_row(&self, row: &Row) -> Result<Identity, CoreError> {
        let pk = self.describe_id()?;
        pk.iter()
            .map(|column| {
                row.get(column).cloned().ok_or_else(|| {
                    CoreError::invalid_identity(format!("row lacks key column '{}'", column))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Identity::new)
    }

    /// Builds key equality predicates for `id`, in key order.
    pub fn primary_key_predicates(&self, id: &Identity) -> Result<Vec<Predicate>, CoreError> {
        if id.is_empty() {
            return Err(CoreError::invalid_identity("empty ID"));
        }

        let pk = self.describe_id()?;
        if id.len() != pk.len() {
            return Err(CoreError::invalid_identity(format!(
                "malformed ID {}: {} expects {} components",
                id,
                self.machine_type(),
                pk.len()
            )));
        }

        Ok(pk
            .into_iter()
            .zip(id.components().iter().cloned())
            .map(|(column, value)| Predicate::eq(column, value))
            .collect())
    }

    /// Fails with `InvalidIdentity` unless `id` is null or has the key arity.
    pub fn check_identity(&self, id: &Identity) -> Result<(), CoreError> {
        if id.is_empty() {
            return Ok(());
        }
        self.primary_key_predicates(id).map(|_| ())
    }

    /// Key predicates plus the permission predicate, for keyed writes.
    pub fn keyed_filter(&self, id: &Identity) -> Result<Vec<Predicate>, CoreError> {
        let mut filter = self.primary_key_predicates(id)?;
        if let Some(predicate) = self.permission_predicate()? {
            filter.push(predicate);
        }
        Ok(filter)
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Returns the current principal if the machine has an owner column.
    pub fn principal(&self) -> Result<Option<Value>, CoreError> {
        let Some(owner) = &self.definition.owner else {
            return Ok(None);
        };
        let auth = self.auth.as_ref().ok_or_else(|| {
            CoreError::configuration(format!(
                "machine '{}' has an owner column but no authenticator",
                self.machine_type()
            ))
        })?;
        auth.principal(&owner.accessor).map(Some)
    }

    /// Returns the owner predicate that every read must carry, if any.
    pub fn permission_predicate(&self) -> Result<Option<Predicate>, CoreError> {
        match (&self.definition.owner, self.principal()?) {
            (Some(owner), Some(principal)) => Ok(Some(Predicate::eq(&owner.column, principal))),
            _ => Ok(None),
        }
    }

    /// Checks whether `action` may run on `reference` and returns the
    /// state it leads to, when the action declares edges.
    pub fn check_transition(
        &self,
        reference: &mut Reference,
        action: &str,
    ) -> Result<Option<String>, CoreError> {
        let definition = self.action(action)?;
        let state = reference.state()?.to_string();

        if !definition.allows_from(&state) {
            return Err(TransitionFailure::new(
                INVALID_TRANSITION,
                format!("cannot apply '{}' in state '{}'", action, state),
            )
            .into());
        }

        if definition.permissions.owner && !reference.is_null_ref() {
            if let (Some(owner), Some(principal)) = (&self.definition.owner, self.principal()?) {
                let properties = reference.properties()?;
                if properties.get(&owner.column) != Some(&principal) {
                    return Err(TransitionFailure::new(
                        FORBIDDEN,
                        format!(
                            "'{}' on {} {} requires ownership",
                            action,
                            self.machine_type(),
                            reference.id()
                        ),
                    )
                    .into());
                }
            }
        }

        Ok(definition.target_state(&state).map(str::to_string))
    }

    /// Returns true if `action` may run on `reference`.
    pub fn is_transition_allowed(
        &self,
        reference: &mut Reference,
        action: &str,
    ) -> Result<bool, CoreError> {
        match self.check_transition(reference, action) {
            Ok(_) => Ok(true),
            Err(CoreError::Transition(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lists the actions allowed on `reference`.
    pub fn available_actions(&self, reference: &mut Reference) -> Result<Vec<String>, CoreError> {
        let names: Vec<String> = self.definition.actions().map(|a| a.name.clone()).collect();
        let mut allowed = Vec::new();
        for name in names {
            if self.is_transition_allowed(reference, &name)? {
                allowed.push(name);
            }
        }
        Ok(allowed)
    }

    // =========================================================================
    // Query steps
    // =========================================================================

    pub fn add_from(&self, query: &mut SelectQuery) {
        query.from(&self.definition.table);
    }

    /// Adds exactly one select item yielding the state.
    pub fn add_state_select(&self, query: &mut SelectQuery) {
        query.select(self.definition.state_select.projection());
    }

    pub fn add_properties_select(&self, query: &mut SelectQuery) {
        query.select(Projection::AllColumns);
    }

    /// Restricts the query to the row identified by `id`.
    pub fn add_primary_key_where(
        &self,
        query: &mut SelectQuery,
        id: &Identity,
    ) -> Result<(), CoreError> {
        for predicate in self.primary_key_predicates(id)? {
            query.filter(predicate);
        }
        Ok(())
    }

    /// Restricts the query to rows the current principal owns.
    pub fn add_permission_condition(&self, query: &mut SelectQuery) -> Result<(), CoreError> {
        if let Some(predicate) = self.permission_predicate()? {
            query.filter(predicate);
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the state of an instance.
    ///
    /// A missing row and an empty state both read as `""`.
    pub fn get_state(&self, id: &Identity) -> Result<String, CoreError> {
        if id.is_empty() {
            return Ok(String::new());
        }

        let mut query = SelectQuery::new();
        self.add_from(&mut query);
        self.add_state_select(&mut query);
        self.add_primary_key_where(&mut query, id)?;
        self.add_permission_condition(&mut query)?;
        query.limit(1);

        let result = self.backend.select(&query)?;
        Ok(result.fetch_column(0).map(state_string).unwrap_or_default())
    }

    /// Returns the properties of an instance, and its state when the
    /// definition loads state together with properties.
    pub fn get_properties(&self, id: &Identity) -> Result<(Row, Option<String>), CoreError> {
        if id.is_empty() {
            return Err(self.not_found(id));
        }

        let with_state = self.definition.load_state_with_properties;

        let mut query = SelectQuery::new();
        self.add_from(&mut query);
        self.add_properties_select(&mut query);
        self.add_primary_key_where(&mut query, id)?;
        if with_state {
            self.add_state_select(&mut query);
        }
        self.add_permission_condition(&mut query)?;
        query.limit(1);

        let result = self.backend.select(&query)?;
        let mut properties = result.fetch_row().ok_or_else(|| self.not_found(id))?;

        let state = if with_state {
            Some(
                properties
                    .remove(STATE_ALIAS)
                    .map(|v| state_string(&v))
                    .unwrap_or_default(),
            )
        } else {
            None
        };

        Ok((properties, state))
    }

    /// Creates a listing over instances visible to the current principal.
    ///
    /// Equality filters on declared properties are applied; other filters
    /// are ignored. The owner predicate and the row cap always apply.
    pub fn create_listing(self: &Arc<Self>, filters: &Row) -> Result<Listing, CoreError> {
        let owner_column = self.definition.owner.as_ref().map(|o| o.column.as_str());

        let mut query = SelectQuery::new();
        self.add_from(&mut query);
        self.add_state_select(&mut query);
        self.add_properties_select(&mut query);

        for (name, value) in filters {
            if Some(name.as_str()) == owner_column {
                tracing::warn!(
                    "Ignoring listing filter on owner column {} of {}",
                    name,
                    self.machine_type()
                );
            } else if !self.definition.has_property(name) {
                tracing::debug!(
                    "Ignoring listing filter on unknown property {} of {}",
                    name,
                    self.machine_type()
                );
            } else {
                query.where_eq(name, value.clone());
            }
        }

        self.add_permission_condition(&mut query)?;
        query.limit(DEFAULT_LISTING_LIMIT);

        Ok(Listing::new(Arc::clone(self), query))
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Returns an unloaded reference to an instance.
    pub fn reference(self: &Arc<Self>, id: Identity) -> Reference {
        Reference::new(Arc::clone(self), id)
    }

    /// Returns a reference to no instance.
    pub fn null_ref(self: &Arc<Self>) -> Reference {
        Reference::new(Arc::clone(self), Identity::null())
    }

    fn not_found(&self, id: &Identity) -> CoreError {
        CoreError::NotFound {
            machine: self.machine_type().to_string(),
            id: id.to_string(),
        }
    }
}

/// Converts a selected state value into its string form.
pub(crate) fn state_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
