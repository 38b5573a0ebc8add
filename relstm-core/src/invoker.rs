//! Action invoker - runs one action and turns its result into outputs.
//!
//! The invoker resolves the target reference from the `ref` argument,
//! calls the transition and projects the declared outputs. Failures whose
//! kind the action accepts become `error_msg` and `exception` outputs; any
//! other failure is returned to the caller unchanged.

use crate::definition::{ActionDefinition, OutputSource};
use crate::error::CoreError;
use crate::machine::RelationalMachine;
use crate::reference::Reference;
use crate::transition::{ActionValue, Arg, Args};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Argument naming the target instance.
pub const REF_ARG: &str = "ref";

/// Output reporting whether the action did something.
pub const DONE_OUTPUT: &str = "done";

/// Output carrying the message of an accepted failure.
pub const ERROR_MSG_OUTPUT: &str = "error_msg";

/// Output carrying the kind of an accepted failure.
pub const EXCEPTION_OUTPUT: &str = "exception";

/// One output value.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Value(Value),
    Ref(Reference),
}

impl Output {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(v) => Some(v),
            Output::Ref(_) => None,
        }
    }

    /// Converts to JSON; references become their identity.
    pub fn to_json(&self) -> Value {
        match self {
            Output::Value(v) => v.clone(),
            Output::Ref(r) => r.id().to_value(),
        }
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

/// Named outputs of an invocation.
pub type Outputs = BTreeMap<String, Output>;

/// How a completed invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    ExpectedFailure,
}

/// Result of a completed invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub outputs: Outputs,
    pub outcome: Outcome,
}

impl Invocation {
    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    /// Returns the `done` output as a boolean.
    pub fn is_done(&self) -> bool {
        matches!(self.outputs.get(DONE_OUTPUT), Some(Output::Value(Value::Bool(true))))
    }
}

/// Invokes one action of one machine type.
pub struct ActionInvoker {
    machine: Arc<RelationalMachine>,
    action: String,
}

impl ActionInvoker {
    /// Fails with `UnknownAction` if the machine does not declare `action`.
    pub fn new(machine: Arc<RelationalMachine>, action: &str) -> Result<Self, CoreError> {
        machine.action(action)?;
        Ok(Self {
            machine,
            action: action.to_string(),
        })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Runs the action.
    ///
    /// A missing or null `ref` argument targets the null reference, which
    /// is how creating actions are invoked.
    pub fn invoke(&self, mut args: Args) -> Result<Invocation, CoreError> {
        let definition = self.machine.action(&self.action)?;
        let mut target = self.resolve_target(args.remove(REF_ARG))?;

        for input in &definition.inputs {
            args.entry(input.clone()).or_insert(Arg::Value(Value::Null));
        }

        tracing::debug!(
            "Invoking {}.{} on {}",
            self.machine.machine_type(),
            self.action,
            target.id()
        );

        match target.invoke(&self.action, &args) {
            Ok(value) => {
                let outputs = self.project(definition, &mut target, value)?;
                Ok(Invocation {
                    outputs,
                    outcome: Outcome::Succeeded,
                })
            }
            Err(e) => {
                let accepted = e.failure_kind().map_or(false, |kind| definition.accepts(kind));
                if !accepted {
                    tracing::error!(
                        "Action {}.{} on {} failed: {}",
                        self.machine.machine_type(),
                        self.action,
                        target.id(),
                        e
                    );
                    return Err(e);
                }

                tracing::warn!(
                    "Action {}.{} on {} failed with accepted failure: {}",
                    self.machine.machine_type(),
                    self.action,
                    target.id(),
                    e
                );
                Ok(Invocation {
                    outputs: accepted_failure_outputs(&e),
                    outcome: Outcome::ExpectedFailure,
                })
            }
        }
    }

    fn resolve_target(&self, arg: Option<Arg>) -> Result<Reference, CoreError> {
        match arg {
            None | Some(Arg::Value(Value::Null)) => Ok(self.machine.null_ref()),
            Some(Arg::Ref(reference)) => {
                if reference.machine_type() != self.machine.machine_type() {
                    return Err(CoreError::invalid_identity(format!(
                        "reference to {} passed to {}.{}",
                        reference.machine_type(),
                        self.machine.machine_type(),
                        self.action
                    )));
                }
                self.machine.check_identity(reference.id())?;
                Ok(reference)
            }
            Some(Arg::Value(value)) => {
                let id = self.machine.identity(&value)?;
                self.machine.check_identity(&id)?;
                Ok(self.machine.reference(id))
            }
        }
    }

    fn project(
        &self,
        definition: &ActionDefinition,
        target: &mut Reference,
        value: ActionValue,
    ) -> Result<Outputs, CoreError> {
        let mut outputs = Outputs::new();

        for (name, source) in &definition.outputs {
            let output = match source {
                OutputSource::Ref => Output::Ref(target.clone()),
                OutputSource::ReturnValue { key: Some(key) } => Output::Value(value.get(key)),
                OutputSource::ReturnValue { key: None } => match &value {
                    ActionValue::Ref(r) => Output::Ref(r.clone()),
                    ActionValue::Value(v) => Output::Value(v.clone()),
                },
                OutputSource::Properties => match target.properties() {
                    Ok(properties) => Output::Value(Value::Object(
                        properties.clone().into_iter().collect(),
                    )),
                    Err(e) if e.is_not_found() => Output::Value(Value::Null),
                    Err(e) => return Err(e),
                },
                OutputSource::State => Output::Value(Value::String(target.state()?.to_string())),
            };
            outputs.insert(name.clone(), output);
        }

        if !definition.declares_output(DONE_OUTPUT) {
            outputs.insert(DONE_OUTPUT.to_string(), Output::Value(Value::Bool(value.is_done())));
        }

        Ok(outputs)
    }
}

fn accepted_failure_outputs(error: &CoreError) -> Outputs {
    let mut outputs = Outputs::new();
    if let CoreError::Transition(failure) = error {
        outputs.insert(
            ERROR_MSG_OUTPUT.to_string(),
            Output::Value(Value::String(failure.message.clone())),
        );
        outputs.insert(
            EXCEPTION_OUTPUT.to_string(),
            Output::Value(Value::String(failure.kind.clone())),
        );
    }
    outputs.insert(DONE_OUTPUT.to_string(), Output::Value(Value::Bool(false)));
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::MachineConfig;
    use crate::error::TransitionFailure;
    use crate::identity::Identity;
    use crate::runtime::Resources;
    use crate::transition::TransitionRegistry;
    use relstm_query::Backend;
    use relstm_storage::{ColumnDef, MemoryBackend};
    use serde_json::json;

    fn setup(actions: Value) -> (Arc<RelationalMachine>, Arc<TransitionRegistry>) {
        let backend = MemoryBackend::new();
        backend
            .create_table(
                "jobs",
                vec![
                    ColumnDef::new("id", "integer").primary_key().auto_increment(),
                    ColumnDef::new("state", "text"),
                    ColumnDef::new("name", "text"),
                ],
            )
            .unwrap();
        backend
            .insert(
                "jobs",
                serde_json::from_value(json!({"state": "queued", "name": "build"})).unwrap(),
            )
            .unwrap();

        let config: MachineConfig =
            serde_json::from_value(json!({"table": "jobs", "actions": actions})).unwrap();
        let resources = Resources::new().with_backend("database", Arc::new(backend));
        let registry = Arc::new(TransitionRegistry::new());
        let machine =
            RelationalMachine::initialize("job", config, &resources, Arc::clone(&registry)).unwrap();
        (Arc::new(machine), registry)
    }

    fn register<F>(registry: &TransitionRegistry, action: &str, f: F)
    where
        F: Fn(&mut Reference, &Args) -> Result<ActionValue, CoreError> + Send + Sync + 'static,
    {
        registry.register("job", action, Arc::new(f));
    }

    fn args(value: Value) -> Args {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Arg::Value(v.clone())))
            .collect()
    }

    #[test]
    fn test_return_value_key() {
        let (machine, registry) = setup(json!({
            "start": {"outputs": {"id": {"source": "return_value", "key": "id"}}}
        }));
        register(&registry, "start", |_, _| Ok(ActionValue::from(json!({"id": 42, "ok": true}))));

        let invocation = ActionInvoker::new(machine, "start").unwrap().invoke(Args::new()).unwrap();
        assert_eq!(invocation.outcome, Outcome::Succeeded);
        assert_eq!(invocation.output("id"), Some(&Output::Value(json!(42))));
        assert!(invocation.is_done());
    }

    #[test]
    fn test_done_from_null_ref() {
        let (machine, registry) = setup(json!({"find": {}}));
        let m = Arc::clone(&machine);
        register(&registry, "find", move |_, _| Ok(ActionValue::from(m.null_ref())));

        let invocation = ActionInvoker::new(machine, "find").unwrap().invoke(Args::new()).unwrap();
        assert_eq!(invocation.output(DONE_OUTPUT), Some(&Output::Value(json!(false))));
    }

    #[test]
    fn test_done_from_ref() {
        let (machine, registry) = setup(json!({"find": {}}));
        let m = Arc::clone(&machine);
        register(&registry, "find", move |_, _| {
            Ok(ActionValue::from(m.reference(Identity::single(1))))
        });

        let invocation = ActionInvoker::new(machine, "find").unwrap().invoke(Args::new()).unwrap();
        assert!(invocation.is_done());
    }

    #[test]
    fn test_declared_done_overrides() {
        let (machine, registry) = setup(json!({
            "probe": {"outputs": {"done": {"source": "return_value", "key": "finished"}}}
        }));
        register(&registry, "probe", |_, _| Ok(ActionValue::from(json!({"finished": "later"}))));

        let invocation = ActionInvoker::new(machine, "probe").unwrap().invoke(Args::new()).unwrap();
        assert_eq!(invocation.output(DONE_OUTPUT), Some(&Output::Value(json!("later"))));
    }

    #[test]
    fn test_unaccepted_failure_propagates() {
        let (machine, registry) = setup(json!({"run": {"accepted_failures": ["busy"]}}));
        register(&registry, "run", |_, _| {
            Err(TransitionFailure::new("crashed", "worker crashed").into())
        });

        let result = ActionInvoker::new(machine, "run").unwrap().invoke(Args::new());
        assert_eq!(result.unwrap_err().failure_kind(), Some("crashed"));
    }

    #[test]
    fn test_accepted_failure_becomes_output() {
        let (machine, registry) = setup(json!({"run": {"accepted_failures": ["busy"]}}));
        register(&registry, "run", |_, _| {
            Err(TransitionFailure::new("busy", "all workers busy").into())
        });

        let invocation = ActionInvoker::new(machine, "run").unwrap().invoke(Args::new()).unwrap();
        assert_eq!(invocation.outcome, Outcome::ExpectedFailure);
        assert_eq!(
            invocation.output(ERROR_MSG_OUTPUT),
            Some(&Output::Value(json!("all workers busy")))
        );
        assert_eq!(invocation.output(EXCEPTION_OUTPUT), Some(&Output::Value(json!("busy"))));
        assert!(!invocation.is_done());
    }

    #[test]
    fn test_identity_errors_never_accepted() {
        let (machine, registry) = setup(json!({"run": {"accepted_failures": ["busy"]}}));
        register(&registry, "run", |_, _| Ok(ActionValue::from(true)));

        let result = ActionInvoker::new(machine, "run")
            .unwrap()
            .invoke(args(json!({"ref": [1, 2]})));
        assert!(matches!(result, Err(CoreError::InvalidIdentity { .. })));
    }

    #[test]
    fn test_ref_state_and_properties_outputs() {
        let (machine, registry) = setup(json!({
            "touch": {
                "inputs": ["note"],
                "outputs": {
                    "ref": "ref",
                    "state": "state",
                    "properties": "properties"
                }
            }
        }));
        register(&registry, "touch", |target, args| {
            assert_eq!(args.get("note"), Some(&Arg::Value(Value::Null)));
            assert_eq!(target.id(), &Identity::single(1));
            Ok(ActionValue::from(true))
        });

        let invocation = ActionInvoker::new(Arc::clone(&machine), "touch")
            .unwrap()
            .invoke(args(json!({"ref": 1})))
            .unwrap();

        assert_eq!(
            invocation.output("ref"),
            Some(&Output::Ref(machine.reference(Identity::single(1))))
        );
        assert_eq!(invocation.output("state"), Some(&Output::Value(json!("queued"))));
        assert_eq!(
            invocation.output("properties").and_then(Output::as_value).map(|v| v["name"].clone()),
            Some(json!("build"))
        );
    }

    #[test]
    fn test_properties_of_missing_instance() {
        let (machine, registry) = setup(json!({"touch": {"outputs": {"properties": "properties"}}}));
        register(&registry, "touch", |_, _| Ok(ActionValue::from(true)));

        let invocation = ActionInvoker::new(machine, "touch")
            .unwrap()
            .invoke(args(json!({"ref": 99})))
            .unwrap();
        assert_eq!(invocation.output("properties"), Some(&Output::Value(Value::Null)));
    }

    #[test]
    fn test_unknown_action() {
        let (machine, _) = setup(json!({}));
        assert!(matches!(
            ActionInvoker::new(machine, "run"),
            Err(CoreError::UnknownAction { .. })
        ));
    }
}
