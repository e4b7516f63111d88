//! # procvisor
//!
//! **Procvisor** is a task and process orchestration library for Rust.
//!
//! It provides named, cancellable, supervised units of concurrent work
//! addressed by `(category, id)`, an event-to-future bridge for adapting
//! push-style callback sources into pull-style sequential consumption, and an
//! actor-like "process" abstraction compiled from declarative schemas.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Process    │   │   Process    │   │   Process    │
//!     │ (schema #1)  │   │ (schema #2)  │   │ (schema #3)  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ProcessRuntime                                                   │
//! │  - compiles each schema once (creators/selectors/reducers/routes) │
//! │  - runs each process as a supervised task tree                    │
//! │  - shares one Bus (actions) across processes and supervisors      │
//! └──────┬────────────────────────────────────────────┬───────────────┘
//!        ▼                                            ▼
//! ┌─────────────────────────────┐      ┌─────────────────────────────┐
//! │  SupervisorRegistry         │      │  Bus (broadcast actions)    │
//! │  id → Supervisor, hot-swap  │      └──────────────┬──────────────┘
//! └──────────────┬──────────────┘                     │
//!                ▼                                    ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (task table: category → id → task)                    │
//! │  - create / run_in / take / take_within                           │
//! │  - overwrite-or-reject, cancel, cancel_category, cancel_all, kill │
//! │  - detached cleanup units + category-done signals                 │
//! └───────────────────────────────────────────────────────────────────┘
//!
//! Event sources (addListener/removeListener style):
//!   source ──► EventObserver ──► EventBridge ──► handler dispatch
//!              (owns listener      (publish/next   (detached per event)
//!               lifecycle)          pairing, FIFO)
//! ```
//!
//! ### Task lifecycle
//! ```text
//! create(category, id, job)
//!   ├─► overwrite: cancel live task at key, AWAIT its settlement
//!   ├─► spawn root wrapper
//!   │     [one-tick grace when replacing]
//!   │     race(job(token), token.cancelled())
//!   │     errors/panics caught here → settle as the task result
//!   ├─► record in table; detached cleanup removes on settlement
//!   │     category emptied → category_done fires exactly once
//!   └─► first create starts the kill watcher:
//!         kill() → signal → cancel every live task → deregister
//! ```
//!
//! ## Features
//! | Area             | Description                                              | Key types                             |
//! |------------------|----------------------------------------------------------|---------------------------------------|
//! | **Supervision**  | Category/id-addressed cancellable tasks.                 | [`Supervisor`], [`TaskHandle`]        |
//! | **Registries**   | Named managers with hot-swap replacement.                | [`SupervisorRegistry`]                |
//! | **Bridging**     | Publish/next pairing, fan-out or FIFO handout.           | [`EventBridge`], [`QueueStyle`]       |
//! | **Observation**  | Callback sources consumed sequentially, guaranteed cleanup. | [`EventObserver`], [`EventSource`] |
//! | **Processes**    | Declarative actors with reducers, routes, creators.      | [`Process`], [`ProcessSchema`], [`ProcessRuntime`] |
//! | **Errors**       | Typed per layer; cancellation always distinguishable.    | [`TaskError`], [`SupervisorError`], [`BridgeError`] |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Bus, Supervisor, SupervisorConfig, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let sup = Supervisor::new("demo", SupervisorConfig::default(), Bus::new(16));
//!
//!     let handle = sup
//!         .create("net", "ping", |token| async move {
//!             tokio::select! {
//!                 _ = token.cancelled() => Err(TaskError::Canceled),
//!                 _ = tokio::time::sleep(Duration::from_millis(10)) => Ok(()),
//!             }
//!         })
//!         .await
//!         .expect("valid task key")
//!         .expect("not suppressed");
//!
//!     let mut handle = handle;
//!     assert!(handle.done().await.is_ok());
//! }
//! ```

mod actions;
mod bridge;
mod config;
mod error;
mod process;
mod supervisor;

// ---- Public re-exports ----

pub use actions::{to_action_type, Action, ActionPattern, Bus};
pub use bridge::{
    BridgeConfig, CancelHandler, EventBridge, EventHandler, EventObserver, EventRecord,
    EventSource, FaultHandler, Listener, ObserverHandlers, QueueStyle,
};
pub use config::SupervisorConfig;
pub use error::{BridgeError, ObserverError, SupervisorError, TaskError};
pub use process::{
    compile, ActionCreator, ActionCreatorSpec, ActionRoute, CompiledSchema, Process,
    ProcessContext, ProcessRuntime, ProcessSchema, ReducerFn, ReducerSpec, RuntimeConfig, Scope,
    ScopeLoader, ScopeTable, SelectorFn, SelectorSpec,
};
pub use supervisor::{
    Supervisor, SupervisorRegistry, TakeOutcome, TaskContext, TaskHandle, TaskResult, TaskStatus,
};
