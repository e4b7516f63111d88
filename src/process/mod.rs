//! Process layer: declarative actors on top of the supervision core.
//!
//! A process is a long-lived stateful unit described by a
//! [`ProcessSchema`] (initial state, action routing, reducers, creators,
//! selectors), compiled once per class into runtime dispatch tables and run
//! as a supervised task tree by the [`ProcessRuntime`].
//!
//! Internal modules:
//! - [`schema`]: the declarative schema and its compiled form;
//! - [`context`]: the instance-side view handed to lifecycle/handler calls;
//! - [`runtime`]: the process registry and orchestration entry points.

mod context;
mod runtime;
mod schema;

pub use context::ProcessContext;
pub use runtime::{Process, ProcessRuntime, RuntimeConfig};
pub use schema::{
    compile, ActionCreator, ActionCreatorSpec, ActionRoute, CompiledSchema, ProcessSchema,
    ReducerFn, ReducerSpec, Scope, ScopeLoader, ScopeTable, SelectorFn, SelectorSpec,
};
