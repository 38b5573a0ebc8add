//! State machine definition types.
//!
//! Machines are declared per type, usually in YAML:
//!
//! ```yaml
//! order:
//!   table: orders
//!   states: [created, paid, shipped]
//!   state: { column: status }
//!   properties:
//!     - { name: id, type: integer, is_pk: true }
//!     - { name: status, type: text }
//!     - { name: amount, type: integer }
//!   actions:
//!     create:
//!       handler: create
//!       inputs: [amount]
//!       transitions: [{ to: created }]
//!       outputs: { ref: return_value }
//!     pay:
//!       handler: set_state
//!       transitions: [{ from: created, to: paid }]
//!       accepted_failures: [invalid_transition]
//! ```
//!
//! When `properties` is omitted, they are introspected from the backing
//! table together with the primary key columns.

use crate::error::CoreError;
use parking_lot::RwLock;
use relstm_query::{ColumnMeta, Projection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Alias under which the state is selected next to properties.
pub const STATE_ALIAS: &str = "__state";

/// A declared property (table column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub semantic_type: String,
    #[serde(default)]
    pub is_pk: bool,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, semantic_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type: semantic_type.into(),
            is_pk: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_pk = true;
        self
    }
}

impl From<ColumnMeta> for PropertyDef {
    fn from(meta: ColumnMeta) -> Self {
        Self {
            name: meta.name,
            semantic_type: meta.native_type,
            is_pk: meta.primary_key,
        }
    }
}

/// How the state of an instance is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StateSelectRaw", into = "StateSelectRaw")]
pub enum StateSelect {
    /// The state is stored in a column.
    Column(String),
    /// Every existing row is in this state.
    Constant(String),
}

impl Default for StateSelect {
    fn default() -> Self {
        StateSelect::Column("state".to_string())
    }
}

impl StateSelect {
    /// Select list item yielding the state under [`STATE_ALIAS`].
    pub fn projection(&self) -> Projection {
        match self {
            StateSelect::Column(column) => Projection::column_as(column, STATE_ALIAS),
            StateSelect::Constant(value) => Projection::literal(value.as_str(), STATE_ALIAS),
        }
    }

    /// Column the state is written to, if the state is stored.
    pub fn column(&self) -> Option<&str> {
        match self {
            StateSelect::Column(column) => Some(column),
            StateSelect::Constant(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateSelectRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    constant: Option<String>,
}

impl TryFrom<StateSelectRaw> for StateSelect {
    type Error = String;

    fn try_from(raw: StateSelectRaw) -> Result<Self, Self::Error> {
        match (raw.column, raw.constant) {
            (Some(column), None) => Ok(StateSelect::Column(column)),
            (None, Some(constant)) => Ok(StateSelect::Constant(constant)),
            _ => Err("state must set exactly one of 'column' or 'constant'".to_string()),
        }
    }
}

impl From<StateSelect> for StateSelectRaw {
    fn from(select: StateSelect) -> Self {
        match select {
            StateSelect::Column(column) => StateSelectRaw {
                column: Some(column),
                constant: None,
            },
            StateSelect::Constant(constant) => StateSelectRaw {
                column: None,
                constant: Some(constant),
            },
        }
    }
}

/// Where a declared action output takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OutputSpecRaw", into = "OutputSpecRaw")]
pub enum OutputSource {
    /// The target reference.
    Ref,
    /// The transition's return value, optionally narrowed to one key.
    ReturnValue { key: Option<String> },
    /// The target's properties after the transition.
    Properties,
    /// The target's state after the transition.
    State,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum OutputSpecRaw {
    Tag(String),
    Full {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
}

impl TryFrom<OutputSpecRaw> for OutputSource {
    type Error = String;

    fn try_from(raw: OutputSpecRaw) -> Result<Self, Self::Error> {
        let (source, key) = match raw {
            OutputSpecRaw::Tag(source) => (source, None),
            OutputSpecRaw::Full { source, key } => (source, key),
        };
        match (source.as_str(), key) {
            ("return_value", key) => Ok(OutputSource::ReturnValue { key }),
            ("ref", None) => Ok(OutputSource::Ref),
            ("properties", None) => Ok(OutputSource::Properties),
            ("state", None) => Ok(OutputSource::State),
            ("ref" | "properties" | "state", Some(_)) => {
                Err(format!("output source '{}' does not take a key", source))
            }
            _ => Err(format!("unknown output source '{}'", source)),
        }
    }
}

impl From<OutputSource> for OutputSpecRaw {
    fn from(source: OutputSource) -> Self {
        match source {
            OutputSource::Ref => OutputSpecRaw::Tag("ref".to_string()),
            OutputSource::ReturnValue { key: None } => OutputSpecRaw::Tag("return_value".to_string()),
            OutputSource::ReturnValue { key } => OutputSpecRaw::Full {
                source: "return_value".to_string(),
                key,
            },
            OutputSource::Properties => OutputSpecRaw::Tag("properties".to_string()),
            OutputSource::State => OutputSpecRaw::Tag("state".to_string()),
        }
    }
}

/// An allowed state change of an action.
///
/// An empty `from` means the action starts from the non-existent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEdge {
    #[serde(default, deserialize_with = "deserialize_from_states")]
    pub from: Vec<String>,
    pub to: String,
}

impl TransitionEdge {
    fn starts_from(&self, state: &str) -> bool {
        if self.from.is_empty() {
            state.is_empty()
        } else {
            self.from.iter().any(|s| s == state)
        }
    }
}

fn deserialize_from_states<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct FromStatesVisitor;

    impl<'de> Visitor<'de> for FromStatesVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a state or list of states")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut states = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                states.push(s);
            }
            Ok(states)
        }
    }

    deserializer.deserialize_any(FromStatesVisitor)
}

/// Permission requirements of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Only the instance owner may invoke the action.
    #[serde(default)]
    pub owner: bool,
}

/// Generic transitions provided by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinHandler {
    Create,
    Update,
    Delete,
    SetState,
}

/// Raw action definition as configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputSource>,
    #[serde(default)]
    pub accepted_failures: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionEdge>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<BuiltinHandler>,
}

/// Raw machine definition as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Backing table.
    pub table: String,
    /// Backend resource name; the runtime default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Authentication resource name; the runtime default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default)]
    pub states: Vec<String>,
    /// Properties in column order. Introspected when empty.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_columns: Option<Vec<String>>,
    #[serde(default)]
    pub state: StateSelect,
    /// Column holding the owner's principal ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_column: Option<String>,
    /// Authentication accessor returning the current principal ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_accessor: Option<String>,
    #[serde(default = "default_true")]
    pub load_state_with_properties: bool,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,
}

fn default_true() -> bool {
    true
}

impl MachineConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            backend: None,
            auth: None,
            states: Vec::new(),
            properties: Vec::new(),
            pk_columns: None,
            state: StateSelect::default(),
            owner_column: None,
            owner_accessor: None,
            load_state_with_properties: true,
            actions: BTreeMap::new(),
        }
    }

    /// Returns true if an owner permission predicate is configured.
    pub fn has_owner(&self) -> bool {
        self.owner_column.is_some() && self.owner_accessor.is_some()
    }
}

/// Validated action definition.
#[derive(Debug, Clone)]
pub struct ActionDefinition {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: BTreeMap<String, OutputSource>,
    pub accepted_failures: BTreeSet<String>,
    pub transitions: Vec<TransitionEdge>,
    pub permissions: Permissions,
    pub handler: Option<BuiltinHandler>,
}

impl ActionDefinition {
    fn from_config(
        name: &str,
        raw: &ActionConfig,
        states: &BTreeSet<String>,
    ) -> Result<Self, CoreError> {
        if !states.is_empty() {
            for edge in &raw.transitions {
                for state in edge.from.iter().chain(std::iter::once(&edge.to)) {
                    if !states.contains(state) {
                        return Err(CoreError::configuration(format!(
                            "action '{}' references unknown state '{}'",
                            name, state
                        )));
                    }
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            inputs: raw.inputs.clone(),
            outputs: raw.outputs.clone(),
            accepted_failures: raw.accepted_failures.iter().cloned().collect(),
            transitions: raw.transitions.clone(),
            permissions: raw.permissions.clone(),
            handler: raw.handler,
        })
    }

    /// Returns true if failures of `kind` become output data.
    pub fn accepts(&self, kind: &str) -> bool {
        self.accepted_failures.contains(kind)
    }

    /// Returns true if the action maps `done` itself.
    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    /// Returns true if the action may start from `state`.
    pub fn allows_from(&self, state: &str) -> bool {
        self.transitions.is_empty() || self.transitions.iter().any(|e| e.starts_from(state))
    }

    /// Returns the state reached from `state`, if the action declares edges.
    pub fn target_state(&self, state: &str) -> Option<&str> {
        self.transitions
            .iter()
            .find(|e| e.starts_from(state))
            .map(|e| e.to.as_str())
    }
}

/// Owner column bound to an authentication accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerBinding {
    pub column: String,
    pub accessor: String,
}

/// Validated machine definition.
///
/// Immutable after construction, except that the key columns may be
/// resolved from backend metadata once, on first use.
#[derive(Debug)]
pub struct MachineDefinition {
    /// Machine type name.
    pub machine_type: String,

    /// Backing table.
    pub table: String,

    /// Declared states. Empty means undeclared.
    pub states: BTreeSet<String>,

    /// Properties in column order.
    properties: Vec<PropertyDef>,

    /// Primary key columns in canonical order, once known.
    pk_columns: RwLock<Option<Vec<String>>>,

    pub state_select: StateSelect,

    pub owner: Option<OwnerBinding>,

    pub load_state_with_properties: bool,

    actions: BTreeMap<String, ActionDefinition>,

    /// Original raw definition.
    pub raw: MachineConfig,

    /// Hash of the definition for change detection.
    pub checksum: String,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON.
    pub fn from_json(
        machine_type: impl Into<String>,
        json: &serde_json::Value,
        columns: Option<Vec<ColumnMeta>>,
    ) -> Result<Self, CoreError> {
        let raw: MachineConfig = serde_json::from_value(json.clone())?;
        Self::from_config(machine_type, raw, columns)
    }

    /// Creates a definition from configuration.
    ///
    /// `columns` is the introspected column metadata of the table and is
    /// required when the configuration declares no properties.
    pub fn from_config(
        machine_type: impl Into<String>,
        raw: MachineConfig,
        columns: Option<Vec<ColumnMeta>>,
    ) -> Result<Self, CoreError> {
        let machine_type = machine_type.into();

        let (properties, pk_columns) = if raw.properties.is_empty() {
            let columns = columns.ok_or_else(|| {
                CoreError::configuration(format!(
                    "machine '{}' declares no properties and table '{}' was not introspected",
                    machine_type, raw.table
                ))
            })?;
            let properties: Vec<PropertyDef> = columns.into_iter().map(PropertyDef::from).collect();
            let pk: Vec<String> = properties
                .iter()
                .filter(|p| p.is_pk)
                .map(|p| p.name.clone())
                .collect();
            (properties, Some(pk))
        } else {
            let pk = match &raw.pk_columns {
                Some(pk) => Some(pk.clone()),
                None => Some(
                    raw.properties
                        .iter()
                        .filter(|p| p.is_pk)
                        .map(|p| p.name.clone())
                        .collect::<Vec<_>>(),
                ),
            };
            (raw.properties.clone(), pk)
        };

        // No key columns known yet: resolved from backend key metadata later
        let pk_columns = pk_columns.filter(|pk| !pk.is_empty());
        if let Some(pk) = &pk_columns {
            validate_pk(&machine_type, &properties, pk)?;
        }

        let owner = match (&raw.owner_column, &raw.owner_accessor) {
            (Some(column), Some(accessor)) => {
                if !properties.iter().any(|p| &p.name == column) {
                    return Err(CoreError::configuration(format!(
                        "owner column '{}' of machine '{}' is not a property",
                        column, machine_type
                    )));
                }
                Some(OwnerBinding {
                    column: column.clone(),
                    accessor: accessor.clone(),
                })
            }
            _ => None,
        };

        let states: BTreeSet<String> = raw.states.iter().cloned().collect();

        let mut actions = BTreeMap::new();
        for (name, action) in &raw.actions {
            actions.insert(
                name.clone(),
                ActionDefinition::from_config(name, action, &states)?,
            );
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            machine_type,
            table: raw.table.clone(),
            states,
            properties,
            pk_columns: RwLock::new(pk_columns),
            state_select: raw.state.clone(),
            owner,
            load_state_with_properties: raw.load_state_with_properties,
            actions,
            raw,
            checksum,
        })
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    /// Returns the key columns if already known.
    pub fn pk_columns(&self) -> Option<Vec<String>> {
        self.pk_columns.read().clone()
    }

    /// Records key columns resolved from the backend. The first recorded
    /// value wins and is returned.
    pub fn memoize_pk_columns(&self, pk: Vec<String>) -> Result<Vec<String>, CoreError> {
        validate_pk(&self.machine_type, &self.properties, &pk)?;
        let mut slot = self.pk_columns.write();
        Ok(slot.get_or_insert(pk).clone())
    }

    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.actions.values()
    }

    /// Returns true if `state` is declared, or states are undeclared.
    pub fn has_state(&self, state: &str) -> bool {
        self.states.is_empty() || self.states.contains(state)
    }
}

fn validate_pk(machine_type: &str, properties: &[PropertyDef], pk: &[String]) -> Result<(), CoreError> {
    if pk.is_empty() {
        return Err(CoreError::configuration(format!(
            "machine '{}' has no primary key columns",
            machine_type
        )));
    }
    for column in pk {
        if !properties.iter().any(|p| &p.name == column) {
            return Err(CoreError::configuration(format!(
                "primary key column '{}' of machine '{}' is not a property",
                column, machine_type
            )));
        }
    }
    Ok(())
}
