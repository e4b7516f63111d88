//! # Manager registry: named supervisors with hot-swap replacement.
//!
//! [`SupervisorRegistry`] maps stable manager names to live
//! [`Supervisor`](super::Supervisor) instances. Supervisors are not multiply
//! alive under one name: creating a manager with a reused id kills the
//! previous holder first.
//!
//! The registry is an explicit, injectable object — construction owns init
//! and [`shutdown`](SupervisorRegistry::shutdown) owns teardown; nothing here
//! relies on process lifetime or module-level state.
//!
//! ## Rules
//! - `create(id, ..)` with a registered, live `id` kills the old manager
//!   (awaited) before installing the replacement.
//! - `kill_all` removes entries *before* the kills settle, so late lookups
//!   cannot observe a dying manager; kills are issued newest-to-oldest by
//!   default.
//! - A supervisor killed directly deregisters itself.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use indexmap::IndexMap;

use super::supervisor::Supervisor;
use crate::actions::Bus;
use crate::config::SupervisorConfig;

/// Process-wide registry mapping manager ids to supervisors.
pub struct SupervisorRegistry {
    bus: Bus,
    managers: Mutex<IndexMap<String, Arc<Supervisor>>>,
}

impl SupervisorRegistry {
    /// Creates a registry whose supervisors share `bus`.
    pub fn new(bus: Bus) -> Arc<Self> {
        Arc::new(Self {
            bus,
            managers: Mutex::new(IndexMap::new()),
        })
    }

    /// The action bus shared by this registry's supervisors.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Creates (or hot-swaps) the supervisor registered under `id`.
    ///
    /// An existing live supervisor under the same id is killed and its
    /// cancellation awaited before the replacement is installed.
    pub async fn create(self: &Arc<Self>, id: &str, config: SupervisorConfig) -> Arc<Supervisor> {
        let previous = {
            let managers = self.managers.lock().expect("registry lock poisoned");
            managers.get(id).cloned()
        };
        if let Some(previous) = previous {
            if !previous.is_killed() {
                previous.kill().await;
            }
        }

        let supervisor = Supervisor::new(id.to_string(), config, self.bus.clone());
        supervisor.attach_owner(Arc::downgrade(self));
        self.managers
            .lock()
            .expect("registry lock poisoned")
            .insert(id.to_string(), Arc::clone(&supervisor));
        supervisor
    }

    /// Looks up a registered supervisor.
    pub fn get(&self, id: &str) -> Option<Arc<Supervisor>> {
        self.managers
            .lock()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Number of registered supervisors.
    pub fn len(&self) -> usize {
        self.managers.lock().expect("registry lock poisoned").len()
    }

    /// True when no supervisor is registered.
    pub fn is_empty(&self) -> bool {
        self.managers
            .lock()
            .expect("registry lock poisoned")
            .is_empty()
    }

    pub(crate) fn remove(&self, id: &str) {
        self.managers
            .lock()
            .expect("registry lock poisoned")
            .shift_remove(id);
    }

    /// Kills every registered supervisor, newest to oldest by default.
    ///
    /// Entries are removed before the kills settle so no lookup can land on a
    /// dying manager while the cancellations drain.
    pub async fn kill_all(&self, reversed: bool) {
        let mut drained: Vec<(String, Arc<Supervisor>)> = {
            let mut managers = self.managers.lock().expect("registry lock poisoned");
            managers.drain(..).collect()
        };
        if reversed {
            drained.reverse();
        }
        join_all(
            drained
                .into_iter()
                .map(|(_, manager)| async move { manager.kill().await }),
        )
        .await;
    }

    /// Explicit teardown: kill everything and leave the registry empty.
    pub async fn shutdown(&self) {
        self.kill_all(true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    fn registry() -> Arc<SupervisorRegistry> {
        SupervisorRegistry::new(Bus::new(16))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reusing_an_id_kills_the_previous_manager() {
        let registry = registry();
        let first = registry.create("root", SupervisorConfig::default()).await;
        first
            .create("jobs", "forever", |token| async move {
                token.cancelled().await;
                Err(TaskError::Canceled)
            })
            .await
            .unwrap()
            .unwrap();

        let second = registry.create("root", SupervisorConfig::default()).await;

        assert!(first.is_killed());
        assert!(!second.is_killed());
        assert_eq!(first.task_count().await, 0);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get("root").unwrap(), &second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_supervisor_deregisters_itself() {
        let registry = registry();
        let manager = registry.create("worker", SupervisorConfig::default()).await;

        manager.kill().await;

        assert!(registry.get("worker").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_all_managers() {
        let registry = registry();
        registry.create("a", SupervisorConfig::default()).await;
        registry.create("b", SupervisorConfig::default()).await;
        registry.create("c", SupervisorConfig::default()).await;
        assert_eq!(registry.len(), 3);

        registry.shutdown().await;

        assert!(registry.is_empty());
    }
}
