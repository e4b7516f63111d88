//! # Process context: the instance-side view of a running process.
//!
//! When the runtime starts a process it merges the compiled schema members,
//! the state slice, the action bus, and the supervising task manager into a
//! [`ProcessContext`] handed to every lifecycle and handler invocation. The
//! context is cheap to clone; all clones observe the same process.

use std::sync::{Arc, OnceLock};

use serde_json::Value;

use super::schema::CompiledSchema;
use crate::actions::{Action, Bus};
use crate::supervisor::Supervisor;

/// Instance-side view of one running process.
#[derive(Clone)]
pub struct ProcessContext {
    pub(crate) pid: Arc<str>,
    pub(crate) schema: Arc<CompiledSchema>,
    pub(crate) state: Arc<tokio::sync::RwLock<Value>>,
    pub(crate) bus: Bus,
    pub(crate) tasks: Arc<Supervisor>,
    pub(crate) scope: Arc<OnceLock<Value>>,
}

impl ProcessContext {
    /// Id of the running process instance.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// The compiled schema shared by every instance of this class.
    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    /// The supervisor managing this process's task tree.
    ///
    /// Tasks the process schedules for itself conventionally use its pid as
    /// the category, so cancel types tear the whole tree down at once.
    pub fn tasks(&self) -> &Arc<Supervisor> {
        &self.tasks
    }

    /// The action bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Builds an action through a compiled creator (private bucket first).
    pub fn action(&self, name: &str, args: &[Value]) -> Option<Action> {
        self.schema.creator(name).map(|creator| creator.build(args))
    }

    /// Publishes an action on the bus.
    pub fn dispatch(&self, action: Action) {
        self.bus.publish(action);
    }

    /// Builds an action through a compiled creator and dispatches it.
    ///
    /// Returns false when no creator exists under `name`.
    pub fn dispatch_named(&self, name: &str, args: &[Value]) -> bool {
        match self.action(name, args) {
            Some(action) => {
                self.dispatch(action);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the process state slice.
    pub async fn state(&self) -> Value {
        self.state.read().await.clone()
    }

    /// Runs a compiled selector against the current state.
    pub async fn select(&self, name: &str) -> Option<Value> {
        let selector = self.schema.selector(name)?;
        let state = self.state.read().await;
        Some(selector(&state))
    }

    /// The lazily-loaded scope, once resolved.
    pub fn scope(&self) -> Option<&Value> {
        self.scope.get()
    }
}
