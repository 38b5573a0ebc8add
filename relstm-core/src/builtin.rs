//! Built-in transitions for plain row manipulation.
//!
//! Actions may name a built-in handler instead of registering their own.
//! Every built-in first checks the declared transition edges and owner
//! permission, then issues a single backend statement.

use crate::definition::{BuiltinHandler, MachineDefinition};
use crate::error::{CoreError, TransitionFailure};
use crate::machine::{RelationalMachine, INVALID_TRANSITION};
use crate::reference::Reference;
use crate::transition::{ActionValue, Arg, Args, TransitionHandler};
use relstm_query::Row;
use serde_json::Value;
use std::sync::Arc;

/// Argument naming the target state of a `set_state` action without edges.
pub const STATE_ARG: &str = "state";

/// A built-in handler bound to one action.
pub struct BuiltinTransition {
    kind: BuiltinHandler,
    action: String,
}

impl BuiltinTransition {
    pub fn new(kind: BuiltinHandler, action: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
        }
    }
}

impl TransitionHandler for BuiltinTransition {
    fn call(&self, target: &mut Reference, args: &Args) -> Result<ActionValue, CoreError> {
        let machine = Arc::clone(target.machine());
        let next_state = machine.check_transition(target, &self.action)?;

        match self.kind {
            BuiltinHandler::Create => create(&machine, next_state, args),
            BuiltinHandler::Update => update(&machine, target, next_state, args),
            BuiltinHandler::Delete => delete(&machine, target),
            BuiltinHandler::SetState => set_state(&machine, target, next_state, args),
        }
    }
}

fn create(
    machine: &Arc<RelationalMachine>,
    next_state: Option<String>,
    args: &Args,
) -> Result<ActionValue, CoreError> {
    let definition = machine.definition();
    let mut row = property_values(definition, args, false);

    if let (Some(column), Some(state)) = (definition.state_select.column(), next_state) {
        row.insert(column.to_string(), Value::String(state));
    }
    if let (Some(owner), Some(principal)) = (&definition.owner, machine.principal()?) {
        row.insert(owner.column.clone(), principal);
    }

    let stored = machine.backend().insert(&definition.table, row)?;
    let id = machine.identity_of_row(&stored)?;
    tracing::debug!("Created {} {}", machine.machine_type(), id);

    Ok(ActionValue::from(machine.reference(id)))
}

fn update(
    machine: &RelationalMachine,
    target: &Reference,
    next_state: Option<String>,
    args: &Args,
) -> Result<ActionValue, CoreError> {
    let definition = machine.definition();
    let mut row = property_values(definition, args, true);

    if let (Some(column), Some(state)) = (definition.state_select.column(), next_state) {
        row.insert(column.to_string(), Value::String(state));
    }

    let filter = machine.keyed_filter(target.id())?;
    let affected = machine.backend().update(&definition.table, &filter, row)?;
    require_row(machine, target, affected)?;

    Ok(ActionValue::from(true))
}

fn delete(machine: &RelationalMachine, target: &Reference) -> Result<ActionValue, CoreError> {
    let filter = machine.keyed_filter(target.id())?;
    let affected = machine.backend().delete(&machine.definition().table, &filter)?;
    require_row(machine, target, affected)?;
    tracing::debug!("Deleted {} {}", machine.machine_type(), target.id());

    Ok(ActionValue::from(true))
}

fn set_state(
    machine: &RelationalMachine,
    target: &Reference,
    next_state: Option<String>,
    args: &Args,
) -> Result<ActionValue, CoreError> {
    let definition = machine.definition();
    let column = definition.state_select.column().ok_or_else(|| {
        CoreError::configuration(format!(
            "machine '{}' selects a constant state, which cannot be set",
            machine.machine_type()
        ))
    })?;

    let state = match next_state {
        Some(state) => state,
        None => match args.get(STATE_ARG).and_then(Arg::as_value) {
            Some(Value::String(state)) if definition.has_state(state) => state.clone(),
            other => {
                return Err(TransitionFailure::new(
                    INVALID_TRANSITION,
                    format!(
                        "'{}' cannot move {} to {}",
                        target.machine_type(),
                        target.id(),
                        other.cloned().unwrap_or(Value::Null)
                    ),
                )
                .into())
            }
        },
    };

    let mut row = Row::new();
    row.insert(column.to_string(), Value::String(state));

    let filter = machine.keyed_filter(target.id())?;
    let affected = machine.backend().update(&definition.table, &filter, row)?;
    require_row(machine, target, affected)?;

    Ok(ActionValue::from(true))
}

/// Declared, non-null property arguments. The state and owner columns are
/// never taken from arguments.
fn property_values(definition: &MachineDefinition, args: &Args, skip_pk: bool) -> Row {
    let pk = definition.pk_columns().unwrap_or_default();
    let state_column = definition.state_select.column();
    let owner_column = definition.owner.as_ref().map(|o| o.column.as_str());

    definition
        .properties()
        .iter()
        .filter(|p| Some(p.name.as_str()) != state_column)
        .filter(|p| Some(p.name.as_str()) != owner_column)
        .filter(|p| !(skip_pk && (p.is_pk || pk.contains(&p.name))))
        .filter_map(|p| match args.get(&p.name).and_then(Arg::as_value) {
            Some(Value::Null) | None => None,
            Some(value) => Some((p.name.clone(), value.clone())),
        })
        .collect()
}

fn require_row(machine: &RelationalMachine, target: &Reference, affected: u64) -> Result<(), CoreError> {
    if affected == 0 {
        return Err(CoreError::NotFound {
            machine: machine.machine_type().to_string(),
            id: target.id().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::definition::MachineConfig;
    use crate::identity::Identity;
    use crate::machine::FORBIDDEN;
    use crate::runtime::Resources;
    use crate::transition::TransitionRegistry;
    use relstm_storage::{ColumnDef, MemoryBackend};
    use serde_json::json;

    fn setup() -> (Arc<MemoryBackend>, Arc<RelationalMachine>) {
        let backend = MemoryBackend::new();
        backend
            .create_table(
                "posts",
                vec![
                    ColumnDef::new("id", "integer").primary_key().auto_increment(),
                    ColumnDef::new("state", "text"),
                    ColumnDef::new("author", "text"),
                    ColumnDef::new("title", "text"),
                ],
            )
            .unwrap();
        let backend = Arc::new(backend);

        let config: MachineConfig = serde_json::from_value(json!({
            "table": "posts",
            "states": ["draft", "published"],
            "owner_column": "author",
            "owner_accessor": "login",
            "actions": {
                "create": {"handler": "create", "transitions": [{"to": "draft"}]},
                "edit": {"handler": "update", "permissions": {"owner": true}},
                "publish": {"handler": "set_state", "transitions": [{"from": "draft", "to": "published"}]},
                "move": {"handler": "set_state"},
                "remove": {"handler": "delete", "permissions": {"owner": true}}
            }
        }))
        .unwrap();
        let resources = Resources::new()
            .with_backend("database", backend.clone())
            .with_auth("auth", Arc::new(StaticAuthenticator::new().with("login", "alice")));
        let machine =
            RelationalMachine::initialize("post", config, &resources, Arc::new(TransitionRegistry::new()))
                .unwrap();
        (backend, Arc::new(machine))
    }

    fn args(value: Value) -> Args {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Arg::Value(v.clone())))
            .collect()
    }

    fn create_post(machine: &Arc<RelationalMachine>) -> Reference {
        let handler = BuiltinTransition::new(BuiltinHandler::Create, "create");
        let mut target = machine.null_ref();
        match handler
            .call(&mut target, &args(json!({"title": "Hello", "author": "mallory", "state": "published"})))
            .unwrap()
        {
            ActionValue::Ref(r) => r,
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_create() {
        let (_, machine) = setup();
        let mut post = create_post(&machine);

        assert_eq!(post.id(), &Identity::single(1));
        assert_eq!(post.state().unwrap(), "draft");
        let properties = post.properties().unwrap();
        assert_eq!(properties["author"], json!("alice"));
        assert_eq!(properties["title"], json!("Hello"));
    }

    #[test]
    fn test_create_twice_rejected() {
        let (_, machine) = setup();
        let mut post = create_post(&machine);

        let handler = BuiltinTransition::new(BuiltinHandler::Create, "create");
        let err = handler.call(&mut post, &Args::new()).unwrap_err();
        assert_eq!(err.failure_kind(), Some(INVALID_TRANSITION));
    }

    #[test]
    fn test_update_skips_key_state_and_owner() {
        let (_, machine) = setup();
        let mut post = create_post(&machine);

        let handler = BuiltinTransition::new(BuiltinHandler::Update, "edit");
        handler
            .call(
                &mut post,
                &args(json!({"id": 7, "title": "Edited", "author": "mallory", "state": "published"})),
            )
            .unwrap();

        post.invalidate();
        assert_eq!(post.id(), &Identity::single(1));
        assert_eq!(post.state().unwrap(), "draft");
        assert_eq!(post.properties().unwrap()["title"], json!("Edited"));
        assert_eq!(post.properties().unwrap()["author"], json!("alice"));
    }

    #[test]
    fn test_set_state_follows_edges() {
        let (_, machine) = setup();
        let mut post = create_post(&machine);
        let publish = BuiltinTransition::new(BuiltinHandler::SetState, "publish");

        publish.call(&mut post, &Args::new()).unwrap();
        post.invalidate();
        assert_eq!(post.state().unwrap(), "published");

        let err = publish.call(&mut post, &Args::new()).unwrap_err();
        assert_eq!(err.failure_kind(), Some(INVALID_TRANSITION));
    }

    #[test]
    fn test_set_state_from_argument() {
        let (_, machine) = setup();
        let mut post = create_post(&machine);
        let set = BuiltinTransition::new(BuiltinHandler::SetState, "move");

        let err = set.call(&mut post, &args(json!({"state": "archived"}))).unwrap_err();
        assert_eq!(err.failure_kind(), Some(INVALID_TRANSITION));

        set.call(&mut post, &args(json!({"state": "published"}))).unwrap();
        post.invalidate();
        assert_eq!(post.state().unwrap(), "published");
    }

    #[test]
    fn test_delete() {
        let (backend, machine) = setup();
        let mut post = create_post(&machine);
        let remove = BuiltinTransition::new(BuiltinHandler::Delete, "remove");

        remove.call(&mut post, &Args::new()).unwrap();
        assert_eq!(backend.row_count("posts").unwrap(), 0);

        post.invalidate();
        assert!(matches!(
            remove.call(&mut post, &Args::new()),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_deleted_reference_stays_deleted() {
        let (_, machine) = setup();
        let mut old = create_post(&machine);
        let remove = BuiltinTransition::new(BuiltinHandler::Delete, "remove");
        remove.call(&mut old, &Args::new()).unwrap();

        let new = create_post(&machine);
        assert_ne!(new.id(), old.id());

        old.invalidate();
        assert_eq!(old.state().unwrap(), "");
    }

    #[test]
    fn test_forbidden_for_foreign_rows() {
        let (_, machine) = setup();
        let mut foreign = Reference::preloaded(
            Arc::clone(&machine),
            Identity::single(5),
            "draft".to_string(),
            serde_json::from_value(json!({"id": 5, "author": "bob"})).unwrap(),
        );

        let err = BuiltinTransition::new(BuiltinHandler::Delete, "remove")
            .call(&mut foreign, &Args::new())
            .unwrap_err();
        assert_eq!(err.failure_kind(), Some(FORBIDDEN));
    }

    #[test]
    fn test_empty_identity_is_invalid() {
        let (_, machine) = setup();
        let mut null = machine.null_ref();

        let err = BuiltinTransition::new(BuiltinHandler::SetState, "move")
            .call(&mut null, &args(json!({"state": "draft"})))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidIdentity { .. }));
    }
}
