//! Best-effort reference loading.
//!
//! Loading turns a reference into displayable data: its state, properties
//! and the actions currently allowed on it. A missing instance is not an
//! error here; it yields an unloaded result with `done = false`.

use crate::error::CoreError;
use crate::invoker::{Output, Outputs, DONE_OUTPUT};
use crate::reference::Reference;
use relstm_query::Row;
use serde_json::Value;
use std::sync::Arc;

/// Options of [`load_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Load properties together with the state.
    pub preload: bool,
    /// Return a fresh, unloaded copy of the reference instead of the loaded one.
    pub new_ref: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            preload: true,
            new_ref: false,
        }
    }
}

/// Data of a loaded reference.
#[derive(Debug, Clone, Default)]
pub struct LoadedRef {
    pub reference: Option<Reference>,
    pub machine_type: Option<String>,
    pub state: Option<String>,
    pub properties: Option<Row>,
    pub actions: Vec<String>,
    pub done: bool,
}

impl LoadedRef {
    /// Returns the named output: `ref`, `machine_type`, `state`,
    /// `properties`, `actions`, `done`, or any single property by name.
    pub fn output(&self, name: &str) -> Option<Output> {
        match name {
            "ref" => self.reference.clone().map(Output::Ref),
            "machine_type" => self
                .machine_type
                .clone()
                .map(|t| Output::Value(Value::String(t))),
            "state" => self.state.clone().map(|s| Output::Value(Value::String(s))),
            "properties" => self
                .properties
                .clone()
                .map(|p| Output::Value(Value::Object(p.into_iter().collect()))),
            "actions" => Some(Output::Value(Value::Array(
                self.actions.iter().cloned().map(Value::String).collect(),
            ))),
            DONE_OUTPUT => Some(Output::Value(Value::Bool(self.done))),
            _ => self
                .properties
                .as_ref()
                .and_then(|p| p.get(name))
                .cloned()
                .map(Output::Value),
        }
    }

    /// Returns every output that has a value.
    pub fn outputs(&self) -> Outputs {
        ["ref", "machine_type", "state", "properties", "actions", DONE_OUTPUT]
            .into_iter()
            .filter_map(|name| self.output(name).map(|o| (name.to_string(), o)))
            .collect()
    }
}

/// Loads a reference. Only identity, configuration and backend failures
/// are returned as errors.
pub fn load_ref(reference: Option<Reference>, options: LoadOptions) -> Result<LoadedRef, CoreError> {
    let Some(mut reference) = reference else {
        return Ok(LoadedRef::default());
    };
    if reference.is_null_ref() {
        return Ok(LoadedRef::default());
    }

    match load(&mut reference, options) {
        Ok(mut loaded) => {
            loaded.reference = Some(if options.new_ref {
                reference.fresh()
            } else {
                reference
            });
            Ok(loaded)
        }
        Err(e) if e.is_not_found() => {
            tracing::debug!("{} {} not found while loading", reference.machine_type(), reference.id());
            Ok(LoadedRef::default())
        }
        Err(e) => Err(e),
    }
}

fn load(reference: &mut Reference, options: LoadOptions) -> Result<LoadedRef, CoreError> {
    let properties = if options.preload {
        Some(reference.properties()?.clone())
    } else {
        None
    };
    let state = reference.state()?.to_string();
    let machine = Arc::clone(reference.machine());
    let actions = machine.available_actions(reference)?;

    Ok(LoadedRef {
        reference: None,
        machine_type: Some(reference.machine_type().to_string()),
        done: !state.is_empty(),
        state: Some(state),
        properties,
        actions,
    })
}
