//! relstm-core - declarative state machines persisted as relational rows.
//!
//! A machine type is bound to one table: each row is an instance, one
//! column (or a constant) is its state, and the remaining columns are its
//! properties. Business logic is attached per action as a
//! [`TransitionHandler`]; the [`ActionInvoker`] runs an action against a
//! [`Reference`] and turns the result into named outputs.

pub mod auth;
pub mod builtin;
pub mod config;
pub mod definition;
pub mod error;
pub mod identity;
pub mod invoker;
pub mod listing;
pub mod load;
pub mod machine;
pub mod reference;
pub mod runtime;
pub mod transition;

pub use auth::{Authenticator, StaticAuthenticator};
pub use builtin::BuiltinTransition;
pub use config::{AuthConfig, ConfigError, RuntimeConfig};
pub use definition::{
    ActionConfig, ActionDefinition, BuiltinHandler, MachineConfig, MachineDefinition,
    OutputSource, PropertyDef, StateSelect, TransitionEdge,
};
pub use error::{CoreError, TransitionFailure};
pub use identity::Identity;
pub use invoker::{ActionInvoker, Invocation, Outcome, Output, Outputs};
pub use listing::{Listing, ListingItem};
pub use load::{load_ref, LoadOptions, LoadedRef};
pub use machine::{RelationalMachine, DEFAULT_LISTING_LIMIT};
pub use reference::Reference;
pub use runtime::{Resource, Resources, Runtime};
pub use transition::{is_truthy, ActionValue, Arg, Args, TransitionHandler, TransitionRegistry};
