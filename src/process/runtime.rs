//! # Process runtime: schema-driven actors on supervised tasks.
//!
//! The [`ProcessRuntime`] owns the process registry, compiles each class's
//! schema once, and runs every process as a supervised task tree.
//!
//! ## Architecture
//! ```text
//! run_processes()
//!     │ hot rerun? ──► kill every manager, rebuild the "root" supervisor
//!     └─► for each registered process:
//!           root.create("processes", pid, run_process)
//!                 │ reuse prior state slice (hot), compile-or-cache schema
//!                 │ load_on? ──► suspend until the gate action, resolve scope
//!                 ├─► root.create(pid, "subscribe_to_types", …)
//!                 │       reducers applied to the state slice,
//!                 │       routes dispatched to on_action (detached),
//!                 │       cancel types tear down category `pid`
//!                 └─► root.create(pid, "process_starts", …)   unless async-only
//! ```
//!
//! ## Rules
//! - One failing process start is caught and logged; it never prevents the
//!   other processes in the same run from starting.
//! - State slices survive hot reruns: a process resumes from its previous
//!   in-memory state when re-run under the same pid.
//! - Everything a process does runs under the root supervisor, addressed by
//!   its pid, so cancel types can tear down the whole tree at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::context::ProcessContext;
use super::schema::{compile, CompiledSchema, ProcessSchema};
use crate::actions::{Action, Bus};
use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, TaskError};
use crate::supervisor::{Supervisor, SupervisorRegistry, TaskResult};

/// A long-lived stateful actor driven by its declarative schema.
#[async_trait]
pub trait Process: Send + Sync + 'static {
    /// Class name; the schema compile cache is keyed by it.
    fn name(&self) -> &str;

    /// The declarative schema, compiled once per class.
    fn schema(&self) -> ProcessSchema;

    /// Synchronous start phase, run as a supervised task unless the schema is
    /// `async_only`.
    async fn process_starts(&self, cx: ProcessContext) -> Result<(), TaskError> {
        let _ = cx;
        Ok(())
    }

    /// Route handler: invoked for every action matching a declared route.
    async fn on_action(
        &self,
        route: &str,
        action: Action,
        cx: ProcessContext,
    ) -> Result<(), TaskError> {
        let _ = (route, action, cx);
        Ok(())
    }
}

/// Runtime-wide configuration.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Emit lifecycle diagnostics through the root supervisor.
    pub log: bool,
    /// Capacity of the shared action bus.
    pub bus_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log: false,
            bus_capacity: 1024,
        }
    }
}

/// Owns the process registry, schema cache, state slices, and the root
/// supervisor; the entry point consumed by the surrounding application.
pub struct ProcessRuntime {
    config: RuntimeConfig,
    bus: Bus,
    managers: Arc<SupervisorRegistry>,
    processes: StdMutex<IndexMap<String, Arc<dyn Process>>>,
    schemas: StdMutex<HashMap<String, Arc<CompiledSchema>>>,
    states: StdMutex<HashMap<String, Arc<RwLock<Value>>>>,
    root: StdMutex<Option<Arc<Supervisor>>>,
    hot: AtomicBool,
}

impl ProcessRuntime {
    /// Creates a runtime with its own action bus and manager registry.
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let bus = Bus::new(config.bus_capacity);
        let managers = SupervisorRegistry::new(bus.clone());
        Arc::new(Self {
            config,
            bus,
            managers,
            processes: StdMutex::new(IndexMap::new()),
            schemas: StdMutex::new(HashMap::new()),
            states: StdMutex::new(HashMap::new()),
            root: StdMutex::new(None),
            hot: AtomicBool::new(false),
        })
    }

    /// The shared action bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The manager registry backing this runtime.
    pub fn managers(&self) -> &Arc<SupervisorRegistry> {
        &self.managers
    }

    /// Registers a process under `pid`, replacing any previous registration.
    pub fn register(&self, pid: impl Into<String>, process: Arc<dyn Process>) {
        self.processes
            .lock()
            .expect("process registry poisoned")
            .insert(pid.into(), process);
    }

    /// Publishes an action on the bus.
    pub fn dispatch(&self, action: Action) {
        self.bus.publish(action);
    }

    /// Snapshot of a process's state slice, if it has ever run.
    pub async fn state_of(&self, pid: &str) -> Option<Value> {
        let slice = {
            self.states
                .lock()
                .expect("state table poisoned")
                .get(pid)
                .cloned()
        };
        match slice {
            Some(slice) => Some(slice.read().await.clone()),
            None => None,
        }
    }

    /// Compiled schema of a process class, once any instance has run.
    ///
    /// Connector-style consumers should read the `public` bucket only; the
    /// `private` bucket exists for the instances themselves.
    pub fn compiled_schema(&self, class: &str) -> Option<Arc<CompiledSchema>> {
        self.schemas
            .lock()
            .expect("schema cache poisoned")
            .get(class)
            .cloned()
    }

    /// Starts every registered process, each as a supervised task.
    ///
    /// A hot rerun kills every previous manager first; prior in-memory state
    /// is reused per pid. One failing process never prevents the others from
    /// starting.
    pub async fn run_processes(self: &Arc<Self>) {
        let root = self.build_root().await;
        let procs: Vec<(String, Arc<dyn Process>)> = {
            let processes = self.processes.lock().expect("process registry poisoned");
            processes
                .iter()
                .map(|(pid, process)| (pid.clone(), Arc::clone(process)))
                .collect()
        };
        for (pid, process) in procs {
            if let Err(e) = self.spawn_process(&root, pid.clone(), process).await {
                error!(process = %pid, error = %e, "failed to start process");
            }
        }
        self.hot.store(true, Ordering::SeqCst);
    }

    /// Starts one registered process by id.
    pub async fn run_process_by_id(self: &Arc<Self>, pid: &str) {
        let process = {
            self.processes
                .lock()
                .expect("process registry poisoned")
                .get(pid)
                .cloned()
        };
        let Some(process) = process else {
            error!(process = %pid, "failed to find process with this id");
            return;
        };
        let root = {
            let root = self.root.lock().expect("root slot poisoned").clone();
            match root {
                Some(root) if !root.is_killed() => root,
                _ => self.build_root().await,
            }
        };
        if let Err(e) = self.spawn_process(&root, pid.to_string(), process).await {
            error!(process = %pid, error = %e, "failed to start process");
        }
    }

    /// Explicit teardown: kill every manager and clear all registries.
    pub async fn shutdown(&self) {
        self.managers.shutdown().await;
        *self.root.lock().expect("root slot poisoned") = None;
        self.states.lock().expect("state table poisoned").clear();
        self.schemas.lock().expect("schema cache poisoned").clear();
        self.processes
            .lock()
            .expect("process registry poisoned")
            .clear();
        self.hot.store(false, Ordering::SeqCst);
    }

    /// Rebuilds the root supervisor, killing prior managers on a hot rerun.
    async fn build_root(self: &Arc<Self>) -> Arc<Supervisor> {
        if self.hot.load(Ordering::SeqCst) {
            self.managers.kill_all(true).await;
        }
        let root = self
            .managers
            .create(
                "root",
                SupervisorConfig {
                    name: "ROOT".to_string(),
                    log: self.config.log,
                    ..SupervisorConfig::default()
                },
            )
            .await;
        *self.root.lock().expect("root slot poisoned") = Some(Arc::clone(&root));
        root
    }

    async fn spawn_process(
        self: &Arc<Self>,
        root: &Arc<Supervisor>,
        pid: String,
        process: Arc<dyn Process>,
    ) -> Result<(), SupervisorError> {
        let rt = Arc::clone(self);
        let root_for_job = Arc::clone(root);
        let job_pid = pid.clone();
        root.create("processes", pid, move |token| async move {
            run_process(rt, root_for_job, job_pid, process, token).await
        })
        .await?;
        Ok(())
    }

    /// Compiles the class schema once; later instances reuse the cache.
    fn compiled_for(&self, process: &dyn Process) -> Arc<CompiledSchema> {
        let class = process.name().to_string();
        {
            let cache = self.schemas.lock().expect("schema cache poisoned");
            if let Some(compiled) = cache.get(&class) {
                return Arc::clone(compiled);
            }
        }
        let compiled = Arc::new(compile(&process.schema()));
        self.schemas
            .lock()
            .expect("schema cache poisoned")
            .entry(class)
            .or_insert(compiled)
            .clone()
    }

    /// Returns the pid's state slice, reusing the previous one across reruns.
    fn state_for(&self, pid: &str, compiled: &CompiledSchema) -> Arc<RwLock<Value>> {
        let mut states = self.states.lock().expect("state table poisoned");
        states
            .entry(pid.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(compiled.initial_state.clone())))
            .clone()
    }
}

/// Body of the supervised task wrapping one process startup.
async fn run_process(
    rt: Arc<ProcessRuntime>,
    root: Arc<Supervisor>,
    pid: String,
    process: Arc<dyn Process>,
    token: CancellationToken,
) -> TaskResult {
    let compiled = rt.compiled_for(process.as_ref());
    let state = rt.state_for(&pid, &compiled);

    if rt.hot.load(Ordering::SeqCst) {
        // Let a prior incarnation's pending cancellations flush first.
        tokio::task::yield_now().await;
    }

    let cx = ProcessContext {
        pid: Arc::from(pid.as_str()),
        schema: Arc::clone(&compiled),
        state,
        bus: rt.bus.clone(),
        tasks: Arc::clone(&root),
        scope: Arc::new(OnceLock::new()),
    };

    if let Some(gate) = &compiled.load_on {
        let gate_action = tokio::select! {
            _ = token.cancelled() => return Err(TaskError::Canceled),
            got = rt.bus.wait_for(gate) => got,
        };
        if gate_action.is_none() {
            return Err(TaskError::fail("action bus closed while waiting to load"));
        }
        if let Some(loader) = &compiled.load_scope {
            let scope = loader().await?;
            let _ = cx.scope.set(scope);
        }
    }

    if !compiled.routes.is_empty() || compiled.cancel_types.is_some() {
        let process = Arc::clone(&process);
        let compiled = Arc::clone(&compiled);
        let cx = cx.clone();
        let root_for_sub = Arc::clone(&root);
        let sub_pid = pid.clone();
        root.create(pid.clone(), "subscribe_to_types", move |sub_token| async move {
            subscribe_to_types(process, compiled, cx, root_for_sub, sub_pid, sub_token).await
        })
        .await
        .map_err(TaskError::fail)?;
    }

    if !compiled.async_only {
        let process = Arc::clone(&process);
        let start_cx = cx.clone();
        root.create(pid.clone(), "process_starts", move |_token| async move {
            process.process_starts(start_cx).await
        })
        .await
        .map_err(TaskError::fail)?;
    }

    Ok(())
}

/// Subscription loop: reducers, route dispatch, and cancel types.
async fn subscribe_to_types(
    process: Arc<dyn Process>,
    compiled: Arc<CompiledSchema>,
    cx: ProcessContext,
    root: Arc<Supervisor>,
    pid: String,
    token: CancellationToken,
) -> TaskResult {
    let mut rx = cx.bus().subscribe();
    loop {
        let action = tokio::select! {
            _ = token.cancelled() => return Err(TaskError::Canceled),
            received = rx.recv() => match received {
                Ok(action) => action,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        };

        if let Some(cancel) = &compiled.cancel_types {
            if cancel.matches(&action) {
                // Detached: joining our own category from inside it would
                // wait on our own settlement.
                let root = Arc::clone(&root);
                let pid = pid.clone();
                tokio::spawn(async move {
                    root.cancel_category(&pid).await;
                });
                return Ok(());
            }
        }

        if let Some(reduce) = compiled.reducers.get(action.kind.as_str()) {
            let mut state = cx.state.write().await;
            let next = reduce(&state, &action);
            *state = next;
        }

        for route in &compiled.routes {
            if route.pattern.matches(&action) {
                let process = Arc::clone(&process);
                let cx = cx.clone();
                let action = action.clone();
                let route_name = route.route.clone();
                tokio::spawn(async move {
                    if let Err(e) = process.on_action(&route_name, action, cx).await {
                        error!(route = %route_name, error = %e, "action handler failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionPattern;
    use crate::process::schema::{ReducerFn, Scope};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::FutureExt;
    use serde_json::{json, Map};

    struct Counter {
        started: Arc<AtomicBool>,
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Process for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn schema(&self) -> ProcessSchema {
            let reduce: ReducerFn = Arc::new(|state, action| {
                let mut next = state.clone();
                if let Some(fields) = next.as_object_mut() {
                    let count = fields.get("count").and_then(Value::as_i64).unwrap_or(0);
                    let by = action.get("by").and_then(Value::as_i64).unwrap_or(1);
                    fields.insert("count".to_string(), json!(count + by));
                }
                next
            });
            ProcessSchema::new("counter", json!({"count": 0}))
                .with_creator("increment", Scope::Public, &["by"], Map::new())
                .with_selector(
                    "count",
                    Scope::Public,
                    Arc::new(|state| state.get("count").cloned().unwrap_or(Value::Null)),
                )
                .with_reducer("increment", reduce)
                .with_route("INCREMENT", "increment")
                .with_cancel_types(ActionPattern::Kind("CANCEL_COUNTER".into()))
        }

        async fn process_starts(&self, _cx: ProcessContext) -> Result<(), TaskError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn on_action(
            &self,
            route: &str,
            _action: Action,
            _cx: ProcessContext,
        ) -> Result<(), TaskError> {
            if route == "increment" {
                self.handled.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn counter() -> (Arc<Counter>, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let started = Arc::new(AtomicBool::new(false));
        let handled = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Counter {
                started: Arc::clone(&started),
                handled: Arc::clone(&handled),
            }),
            started,
            handled,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_routes_actions_and_applies_reducers() {
        let rt = ProcessRuntime::new(RuntimeConfig::default());
        let (process, started, handled) = counter();
        rt.register("counter-1", process);

        rt.run_processes().await;
        settle().await;
        assert!(started.load(Ordering::SeqCst));

        rt.dispatch(Action::new("INCREMENT").with("by", json!(2)));
        settle().await;

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        let state = rt.state_of("counter-1").await.unwrap();
        assert_eq!(state.get("count"), Some(&json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_process_does_not_block_the_others() {
        struct Failing;

        #[async_trait]
        impl Process for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn schema(&self) -> ProcessSchema {
                ProcessSchema::new("failing", Value::Null)
            }
            async fn process_starts(&self, _cx: ProcessContext) -> Result<(), TaskError> {
                Err(TaskError::fail("refuses to start"))
            }
        }

        let rt = ProcessRuntime::new(RuntimeConfig::default());
        let (process, started, _handled) = counter();
        rt.register("broken", Arc::new(Failing));
        rt.register("counter-1", process);

        rt.run_processes().await;
        settle().await;

        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_types_tear_down_the_process_task_tree() {
        struct Sleeper;

        #[async_trait]
        impl Process for Sleeper {
            fn name(&self) -> &str {
                "sleeper"
            }
            fn schema(&self) -> ProcessSchema {
                ProcessSchema::new("sleeper", Value::Null)
                    .with_cancel_types(ActionPattern::Kind("HALT".into()))
            }
            async fn process_starts(&self, _cx: ProcessContext) -> Result<(), TaskError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let rt = ProcessRuntime::new(RuntimeConfig::default());
        rt.register("sleeper-1", Arc::new(Sleeper));
        rt.run_processes().await;
        settle().await;

        let root = rt.managers().get("root").unwrap();
        assert!(root.task_exists("sleeper-1", "process_starts").await);

        rt.dispatch(Action::new("HALT"));
        settle().await;

        assert!(!root.task_exists("sleeper-1", "process_starts").await);
        assert!(!root.task_exists("sleeper-1", "subscribe_to_types").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_rerun_preserves_process_state() {
        let rt = ProcessRuntime::new(RuntimeConfig::default());
        let (process, _started, _handled) = counter();
        rt.register("counter-1", process);

        rt.run_processes().await;
        settle().await;
        rt.dispatch(Action::new("INCREMENT"));
        settle().await;
        assert_eq!(
            rt.state_of("counter-1").await.unwrap().get("count"),
            Some(&json!(1))
        );

        // Hot rerun: managers rebuilt, state preserved.
        rt.run_processes().await;
        settle().await;
        assert_eq!(
            rt.state_of("counter-1").await.unwrap().get("count"),
            Some(&json!(1))
        );

        rt.dispatch(Action::new("INCREMENT"));
        settle().await;
        assert_eq!(
            rt.state_of("counter-1").await.unwrap().get("count"),
            Some(&json!(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_on_gates_startup_until_the_action_arrives() {
        struct Gated {
            started: Arc<AtomicBool>,
            scope_seen: Arc<AtomicBool>,
        }

        #[async_trait]
        impl Process for Gated {
            fn name(&self) -> &str {
                "gated"
            }
            fn schema(&self) -> ProcessSchema {
                ProcessSchema::new("gated", Value::Null).with_load_on(
                    ActionPattern::Kind("BOOT".into()),
                    Some(Arc::new(|| {
                        async { Ok(json!({"db": "ready"})) }.boxed()
                    })),
                )
            }
            async fn process_starts(&self, cx: ProcessContext) -> Result<(), TaskError> {
                self.scope_seen.store(
                    cx.scope() == Some(&json!({"db": "ready"})),
                    Ordering::SeqCst,
                );
                self.started.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let started = Arc::new(AtomicBool::new(false));
        let scope_seen = Arc::new(AtomicBool::new(false));
        let rt = ProcessRuntime::new(RuntimeConfig::default());
        rt.register(
            "gated-1",
            Arc::new(Gated {
                started: Arc::clone(&started),
                scope_seen: Arc::clone(&scope_seen),
            }),
        );

        rt.run_processes().await;
        settle().await;
        assert!(!started.load(Ordering::SeqCst));

        rt.dispatch(Action::new("BOOT"));
        settle().await;

        assert!(started.load(Ordering::SeqCst));
        assert!(scope_seen.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_everything() {
        let rt = ProcessRuntime::new(RuntimeConfig::default());
        let (process, _started, _handled) = counter();
        rt.register("counter-1", process);
        rt.run_processes().await;
        settle().await;

        rt.shutdown().await;

        assert!(rt.managers().is_empty());
        assert!(rt.state_of("counter-1").await.is_none());
    }
}
