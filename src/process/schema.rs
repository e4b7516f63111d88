//! # Declarative process schemas and their compiled form.
//!
//! A [`ProcessSchema`] describes a process class as plain data: initial
//! state, action creators, selectors, reducers, action routes, cancel types,
//! and an optional lazily-loaded scope. [`compile`] turns the declaration
//! into runtime dispatch tables once per class; many process instances may
//! share one compiled schema.
//!
//! ## Scoping
//! Creators and selectors carry an explicit [`Scope`]: `Public` members are
//! exported to external consumers, `Private` members are visible only inside
//! the process instance. The partition is a typed field, not a name prefix.
//!
//! ## Type derivation
//! Creator names transform deterministically into action types through
//! [`to_action_type`](crate::to_action_type): `setValue` → `SET_VALUE`.
//! Declared reducer keys go through the same transform so creators and
//! reducers line up however they were written.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::actions::{to_action_type, Action, ActionPattern};
use crate::error::TaskError;

/// Pure state transition: `(state, action) → state`.
pub type ReducerFn = Arc<dyn Fn(&Value, &Action) -> Value + Send + Sync>;

/// Pure state projection: `state → value`.
pub type SelectorFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Async loader resolving a process's lazily-created scope.
pub type ScopeLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, TaskError>> + Send + Sync>;

/// Visibility of a schema member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Exported to external consumers.
    Public,
    /// Visible only inside the process instance.
    Private,
}

/// Declared action creator: name, scope, positional keys, merged fields.
#[derive(Clone)]
pub struct ActionCreatorSpec {
    /// Creator name; the action type derives from it.
    pub name: String,
    /// Visibility of the compiled creator.
    pub scope: Scope,
    /// Payload keys filled positionally from build arguments.
    pub keys: Vec<String>,
    /// Fields merged into every built action.
    pub merge: Map<String, Value>,
}

/// Declared selector.
#[derive(Clone)]
pub struct SelectorSpec {
    /// Selector name.
    pub name: String,
    /// Visibility of the compiled selector.
    pub scope: Scope,
    /// The projection itself.
    pub select: SelectorFn,
}

/// Declared reducer, keyed by action type.
#[derive(Clone)]
pub struct ReducerSpec {
    /// Action type (creator-name form accepted; transformed on compile).
    pub kind: String,
    /// The transition itself.
    pub reduce: ReducerFn,
}

/// Declared action route: matching actions dispatch to the named handler.
#[derive(Clone)]
pub struct ActionRoute {
    /// Which actions trigger the route.
    pub pattern: ActionPattern,
    /// Handler route name passed to [`Process::on_action`](crate::Process::on_action).
    pub route: String,
}

/// Declarative description of a process class.
#[derive(Clone)]
pub struct ProcessSchema {
    /// Class identity; the compile cache is keyed by it.
    pub name: String,
    /// Process has no synchronous start phase (`process_starts` is skipped).
    pub async_only: bool,
    /// Initial state slice.
    pub initial_state: Value,
    /// Declared action creators.
    pub action_creators: Vec<ActionCreatorSpec>,
    /// Declared selectors.
    pub selectors: Vec<SelectorSpec>,
    /// Declared reducers.
    pub reducers: Vec<ReducerSpec>,
    /// Declared action routes.
    pub action_routes: Vec<ActionRoute>,
    /// Actions that cancel this process's task tree.
    pub cancel_types: Option<ActionPattern>,
    /// Startup suspends until a matching action arrives.
    pub load_on: Option<ActionPattern>,
    /// Loader resolving the lazy scope once startup proceeds.
    pub load_scope: Option<ScopeLoader>,
}

impl ProcessSchema {
    /// Creates an empty schema with the given class name and initial state.
    pub fn new(name: impl Into<String>, initial_state: Value) -> Self {
        Self {
            name: name.into(),
            async_only: false,
            initial_state,
            action_creators: Vec::new(),
            selectors: Vec::new(),
            reducers: Vec::new(),
            action_routes: Vec::new(),
            cancel_types: None,
            load_on: None,
            load_scope: None,
        }
    }

    /// Declares an action creator.
    pub fn with_creator(
        mut self,
        name: impl Into<String>,
        scope: Scope,
        keys: &[&str],
        merge: Map<String, Value>,
    ) -> Self {
        self.action_creators.push(ActionCreatorSpec {
            name: name.into(),
            scope,
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
            merge,
        });
        self
    }

    /// Declares a selector.
    pub fn with_selector(mut self, name: impl Into<String>, scope: Scope, select: SelectorFn) -> Self {
        self.selectors.push(SelectorSpec {
            name: name.into(),
            scope,
            select,
        });
        self
    }

    /// Declares a reducer for the given action type.
    pub fn with_reducer(mut self, kind: impl Into<String>, reduce: ReducerFn) -> Self {
        self.reducers.push(ReducerSpec {
            kind: kind.into(),
            reduce,
        });
        self
    }

    /// Declares an action route.
    pub fn with_route(mut self, pattern: impl Into<ActionPattern>, route: impl Into<String>) -> Self {
        self.action_routes.push(ActionRoute {
            pattern: pattern.into(),
            route: route.into(),
        });
        self
    }

    /// Declares the cancel pattern for this process's task tree.
    pub fn with_cancel_types(mut self, pattern: ActionPattern) -> Self {
        self.cancel_types = Some(pattern);
        self
    }

    /// Suspends startup until a matching action arrives, then resolves the
    /// lazy scope through `loader`.
    pub fn with_load_on(mut self, pattern: ActionPattern, loader: Option<ScopeLoader>) -> Self {
        self.load_on = Some(pattern);
        self.load_scope = loader;
        self
    }

    /// Marks the process as purely asynchronous (no `process_starts` phase).
    pub fn async_only(mut self) -> Self {
        self.async_only = true;
        self
    }
}

/// Compiled action creator: builds `{type, named args…, merged}` actions.
#[derive(Clone)]
pub struct ActionCreator {
    kind: String,
    keys: Vec<String>,
    merge: Map<String, Value>,
}

impl ActionCreator {
    /// The derived action type.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Builds an action from positional arguments.
    ///
    /// Merged fields come first, positional keys override them, and any
    /// trailing object arguments beyond the declared keys are merged over the
    /// result in order.
    pub fn build(&self, args: &[Value]) -> Action {
        let mut payload = self.merge.clone();
        let mut args = args.iter();
        for key in &self.keys {
            if let Some(value) = args.next() {
                payload.insert(key.clone(), value.clone());
            }
        }
        for extra in args {
            if let Value::Object(fields) = extra {
                for (key, value) in fields {
                    payload.insert(key.clone(), value.clone());
                }
            }
        }
        Action {
            kind: self.kind.clone(),
            payload,
        }
    }
}

/// One visibility bucket of a compiled schema.
#[derive(Clone, Default)]
pub struct ScopeTable {
    /// Compiled creators by declared name.
    pub actions: HashMap<String, ActionCreator>,
    /// Selectors by declared name.
    pub selectors: HashMap<String, SelectorFn>,
}

/// Runtime dispatch tables compiled from one [`ProcessSchema`].
#[derive(Clone)]
pub struct CompiledSchema {
    /// Members exported to external consumers.
    pub public: ScopeTable,
    /// Members visible only inside the process instance.
    pub private: ScopeTable,
    /// Reducers keyed by derived action type.
    pub reducers: HashMap<String, ReducerFn>,
    /// Action routes in declaration order.
    pub routes: Vec<ActionRoute>,
    /// Actions cancelling the process's task tree.
    pub cancel_types: Option<ActionPattern>,
    /// Startup gate pattern.
    pub load_on: Option<ActionPattern>,
    /// Lazy scope loader.
    pub load_scope: Option<ScopeLoader>,
    /// Initial state slice.
    pub initial_state: Value,
    /// Process has no synchronous start phase.
    pub async_only: bool,
}

impl CompiledSchema {
    /// Looks up a creator, private bucket first (instance view).
    pub fn creator(&self, name: &str) -> Option<&ActionCreator> {
        self.private
            .actions
            .get(name)
            .or_else(|| self.public.actions.get(name))
    }

    /// Looks up a selector, private bucket first (instance view).
    pub fn selector(&self, name: &str) -> Option<&SelectorFn> {
        self.private
            .selectors
            .get(name)
            .or_else(|| self.public.selectors.get(name))
    }
}

/// Compiles a schema into its runtime dispatch tables.
///
/// Pure and deterministic; the runtime caches the result per class name so
/// compilation happens once however many instances run.
pub fn compile(schema: &ProcessSchema) -> CompiledSchema {
    let mut public = ScopeTable::default();
    let mut private = ScopeTable::default();

    for spec in &schema.action_creators {
        let creator = ActionCreator {
            kind: to_action_type(&spec.name),
            keys: spec.keys.clone(),
            merge: spec.merge.clone(),
        };
        let bucket = match spec.scope {
            Scope::Public => &mut public,
            Scope::Private => &mut private,
        };
        bucket.actions.insert(spec.name.clone(), creator);
    }

    for spec in &schema.selectors {
        let bucket = match spec.scope {
            Scope::Public => &mut public,
            Scope::Private => &mut private,
        };
        bucket
            .selectors
            .insert(spec.name.clone(), Arc::clone(&spec.select));
    }

    let mut reducers = HashMap::with_capacity(schema.reducers.len());
    for spec in &schema.reducers {
        reducers.insert(to_action_type(&spec.kind), Arc::clone(&spec.reduce));
    }

    CompiledSchema {
        public,
        private,
        reducers,
        routes: schema.action_routes.clone(),
        cancel_types: schema.cancel_types.clone(),
        load_on: schema.load_on.clone(),
        load_scope: schema.load_scope.clone(),
        initial_state: schema.initial_state.clone(),
        async_only: schema.async_only,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_creator_builds_typed_action_from_positional_args() {
        let schema = ProcessSchema::new("settings", json!({})).with_creator(
            "setValue",
            Scope::Public,
            &["key", "value"],
            Map::new(),
        );
        let compiled = compile(&schema);

        let creator = compiled.public.actions.get("setValue").unwrap();
        assert_eq!(creator.kind(), "SET_VALUE");

        let action = creator.build(&[json!("volume"), json!(11)]);
        assert_eq!(action.kind, "SET_VALUE");
        assert_eq!(action.get("key"), Some(&json!("volume")));
        assert_eq!(action.get("value"), Some(&json!(11)));
    }

    #[test]
    fn test_creator_merge_and_trailing_objects() {
        let schema = ProcessSchema::new("settings", json!({})).with_creator(
            "save",
            Scope::Public,
            &["key"],
            merge(&[("source", json!("schema")), ("key", json!("default"))]),
        );
        let compiled = compile(&schema);
        let creator = compiled.public.actions.get("save").unwrap();

        // Positional key overrides the merged default; the trailing object
        // overrides everything.
        let action = creator.build(&[json!("volume"), json!({"source": "caller"})]);
        assert_eq!(action.get("key"), Some(&json!("volume")));
        assert_eq!(action.get("source"), Some(&json!("caller")));
    }

    #[test]
    fn test_scope_partition_keeps_private_members_private() {
        let schema = ProcessSchema::new("settings", json!({}))
            .with_creator("publish", Scope::Public, &[], Map::new())
            .with_creator("internalReset", Scope::Private, &[], Map::new());
        let compiled = compile(&schema);

        assert!(compiled.public.actions.contains_key("publish"));
        assert!(!compiled.public.actions.contains_key("internalReset"));
        assert!(compiled.private.actions.contains_key("internalReset"));

        // Instance view sees both.
        assert!(compiled.creator("publish").is_some());
        assert!(compiled.creator("internalReset").is_some());
    }

    #[test]
    fn test_reducer_keys_share_the_creator_transform() {
        let reduce: ReducerFn = Arc::new(|state, _action| state.clone());
        let schema = ProcessSchema::new("counter", json!({"count": 0}))
            .with_reducer("increment", Arc::clone(&reduce))
            .with_reducer("HARD_RESET", reduce);
        let compiled = compile(&schema);

        assert!(compiled.reducers.contains_key("INCREMENT"));
        assert!(compiled.reducers.contains_key("HARD_RESET"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let schema = ProcessSchema::new("settings", json!({"a": 1}))
            .with_creator("setValue", Scope::Public, &["key"], Map::new());
        let first = compile(&schema);
        let second = compile(&schema);

        let a = first.public.actions.get("setValue").unwrap();
        let b = second.public.actions.get("setValue").unwrap();
        assert_eq!(a.kind(), b.kind());
        assert_eq!(
            a.build(&[json!("x")]).payload,
            b.build(&[json!("x")]).payload
        );
    }
}
