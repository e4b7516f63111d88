//! # Supervisor: the scheduling core.
//!
//! The [`Supervisor`] creates, tracks, cancels, and cleans up named concurrent
//! units of work, organized in a two-level table `category → id → task`, with
//! overwrite and completion-notification semantics.
//!
//! ## Architecture
//! ```text
//! create(category, id, job)
//!     │ 1. validate key, apply overwrite-or-reject policy
//!     │ 2. overwrite: cancel the live task at the key and AWAIT its settlement
//!     │ 3. spawn root wrapper:
//!     │       [grace tick when replacing] → race(job, token)
//!     │       body errors/panics caught here, settle as the task result
//!     │ 4. record entry in the task table
//!     ├─► detached cleanup unit: await settlement → remove entry
//!     │       category emptied → delete it, fire category-done exactly once
//!     └─► lazily start the kill watcher (first create only):
//!             await kill signal → cancel every live task
//! ```
//!
//! ## Rules
//! - At most one live task per `(category, id)`: a second `create` either
//!   cancels-and-replaces (overwrite, default) or is rejected (strict).
//! - Replacement is strictly sequential: the prior task's teardown completes
//!   before the replacement body starts, plus a one-tick grace delay.
//! - Cancelling an absent or settled task is a silent no-op.
//! - Body errors are reported and settle the task; they never propagate past
//!   the supervisor (nothing upstream awaits task bodies directly).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::handle::{await_settled, DoneReceiver, TaskContext, TaskHandle, TaskResult};
use super::registry::SupervisorRegistry;
use crate::actions::{Action, ActionPattern, Bus};
use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, TaskError};

/// Grace delay before a replacement body starts at an overwritten key.
///
/// Lets the previous task's teardown finish before the replacement touches
/// shared resources. This reduces, not eliminates, the race.
const GRACE_TICK: Duration = Duration::from_millis(1);

/// Outcome handed to a [`Supervisor::take_within`] body.
#[derive(Clone, Debug)]
pub enum TakeOutcome {
    /// The awaited action arrived within the window.
    Received(Action),
    /// The window elapsed first.
    TimedOut,
}

impl TakeOutcome {
    /// True when the action arrived in time.
    pub fn is_success(&self) -> bool {
        matches!(self, TakeOutcome::Received(_))
    }

    /// The received action, if any.
    pub fn action(&self) -> Option<&Action> {
        match self {
            TakeOutcome::Received(action) => Some(action),
            TakeOutcome::TimedOut => None,
        }
    }
}

struct TaskEntry {
    seq: u64,
    token: CancellationToken,
    done: DoneReceiver,
}

#[derive(Default)]
struct Tables {
    categories: HashMap<String, HashMap<String, TaskEntry>>,
    category_done: HashMap<String, watch::Sender<bool>>,
}

impl Tables {
    /// Returns the category map, creating it (and its done signal) if needed.
    fn category_entry(&mut self, category: &str) -> &mut HashMap<String, TaskEntry> {
        if !self.categories.contains_key(category) {
            self.categories.insert(category.to_string(), HashMap::new());
            self.category_done
                .entry(category.to_string())
                .or_insert_with(|| watch::channel(false).0);
        }
        self.categories
            .get_mut(category)
            .expect("category just inserted")
    }
}

/// Scheduling core owning the task table and cancellation policy.
///
/// One supervisor per logical root (one per running process, one global
/// root). Constructed directly or through a
/// [`SupervisorRegistry`](crate::SupervisorRegistry), which adds hot-swap
/// replacement by name.
pub struct Supervisor {
    id: Arc<str>,
    config: SupervisorConfig,
    bus: Bus,
    tables: Mutex<Tables>,
    kill_signal: CancellationToken,
    killed: AtomicBool,
    watcher_started: AtomicBool,
    next_seq: AtomicU64,
    owner: std::sync::Mutex<Option<Weak<SupervisorRegistry>>>,
}

impl Supervisor {
    /// Creates a standalone supervisor.
    ///
    /// The bus feeds the [`take`](Self::take) family; share one bus between
    /// supervisors and the process runtime to observe the same actions.
    pub fn new(id: impl Into<Arc<str>>, config: SupervisorConfig, bus: Bus) -> Arc<Self> {
        let sup = Arc::new(Self {
            id: id.into(),
            config,
            bus,
            tables: Mutex::new(Tables::default()),
            kill_signal: CancellationToken::new(),
            killed: AtomicBool::new(false),
            watcher_started: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            owner: std::sync::Mutex::new(None),
        });
        if sup.config.log {
            debug!(icon = %sup.config.icon, manager = %sup.id, name = %sup.config.name, "task manager constructed");
        }
        sup
    }

    /// Unique manager id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Manager configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The action bus this supervisor observes.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// True once [`kill`](Self::kill) has run.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_owner(&self, registry: Weak<SupervisorRegistry>) {
        *self.owner.lock().expect("owner lock poisoned") = Some(registry);
    }

    /// Schedules `job` at `(category, id)`.
    ///
    /// With `overwrite` (default), a live task at the key is cancelled and its
    /// settlement awaited before the replacement is spawned; without it the
    /// call is rejected with [`SupervisorError::TaskExists`], or degrades to a
    /// logged no-op returning `Ok(None)` under `silent`.
    ///
    /// Errors raised by this call are surfaced to the caller; errors raised
    /// *inside* `job` are caught at the task root and settle the task instead.
    pub async fn create<F, Fut>(
        self: &Arc<Self>,
        category: impl Into<String>,
        id: impl Into<String>,
        job: F,
    ) -> Result<Option<TaskHandle>, SupervisorError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let category = category.into();
        let id = id.into();

        if self.is_killed() {
            return Err(SupervisorError::Killed {
                manager: self.id.to_string(),
            });
        }
        if category.is_empty() || id.is_empty() {
            return Err(SupervisorError::MissingTaskKey { category, id });
        }

        let replaced = if self.config.overwrite {
            self.cancel_task(&category, &id).await
        } else {
            if self.task_exists(&category, &id).await {
                if self.config.silent {
                    warn!(
                        manager = %self.id,
                        task = %format_args!("{category}.{id}"),
                        "task exists and overwrite is disabled; create suppressed"
                    );
                    return Ok(None);
                }
                return Err(SupervisorError::TaskExists { category, id });
            }
            false
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let context = TaskContext::new(&category, &id);

        {
            let token = token.clone();
            let context = context.clone();
            tokio::spawn(async move {
                let result = run_task_root(job, token, &context, replaced).await;
                let _ = done_tx.send(Some(result));
            });
        }

        {
            let mut tables = self.tables.lock().await;
            let slot = tables.category_entry(&category);
            if slot.contains_key(&id) {
                // Invariant violation: the key should have been cleared above.
                token.cancel();
                error!(
                    manager = %self.id,
                    task = %format_args!("{category}.{id}"),
                    "failed to save task: slot already occupied"
                );
                return Err(SupervisorError::SaveConflict { category, id });
            }
            slot.insert(
                id.clone(),
                TaskEntry {
                    seq,
                    token: token.clone(),
                    done: done_rx.clone(),
                },
            );
        }

        if self.config.log {
            debug!(
                icon = %self.config.icon,
                manager = %self.id,
                category = %category,
                id = %id,
                "task created"
            );
        }

        self.spawn_cleanup(category, id, seq, done_rx.clone());

        if !self.watcher_started.swap(true, Ordering::SeqCst) {
            self.spawn_kill_watcher();
        }

        Ok(Some(TaskHandle {
            context,
            token,
            done: done_rx,
        }))
    }

    /// Schedules `job` to run after `delay`.
    ///
    /// Cancellation mid-wait drops the delay; `job` is never invoked.
    pub async fn run_in<F, Fut>(
        self: &Arc<Self>,
        delay: Duration,
        category: impl Into<String>,
        id: impl Into<String>,
        job: F,
    ) -> Result<Option<TaskHandle>, SupervisorError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.create(category, id, move |token| async move {
            tokio::time::sleep(delay).await;
            job(token).await
        })
        .await
    }

    /// Suspends until an action matching `pattern` occurs, then runs `job`
    /// with the action.
    pub async fn take<F, Fut>(
        self: &Arc<Self>,
        pattern: ActionPattern,
        category: impl Into<String>,
        id: impl Into<String>,
        job: F,
    ) -> Result<Option<TaskHandle>, SupervisorError>
    where
        F: FnOnce(Action, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let bus = self.bus.clone();
        self.create(category, id, move |token| async move {
            match bus.wait_for(&pattern).await {
                Some(action) => job(action, token).await,
                None => Err(TaskError::fail("action bus closed")),
            }
        })
        .await
    }

    /// Races an action matching `pattern` against `window`, then runs `job`
    /// with the [`TakeOutcome`]. Losing the race cancels the other branch.
    pub async fn take_within<F, Fut>(
        self: &Arc<Self>,
        pattern: ActionPattern,
        window: Duration,
        category: impl Into<String>,
        id: impl Into<String>,
        job: F,
    ) -> Result<Option<TaskHandle>, SupervisorError>
    where
        F: FnOnce(TakeOutcome, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let bus = self.bus.clone();
        self.create(category, id, move |token| async move {
            let outcome = tokio::select! {
                _ = tokio::time::sleep(window) => TakeOutcome::TimedOut,
                got = bus.wait_for(&pattern) => match got {
                    Some(action) => TakeOutcome::Received(action),
                    None => TakeOutcome::TimedOut,
                },
            };
            job(outcome, token).await
        })
        .await
    }

    /// Cancels one task, or the whole category when `id` is `None`.
    ///
    /// Returns true when anything was cancelled. Cancelling a task that does
    /// not exist or is already settled is a silent no-op.
    pub async fn cancel(&self, category: &str, id: Option<&str>) -> bool {
        match id {
            Some(id) => self.cancel_task(category, id).await,
            None => self.cancel_category(category).await > 0,
        }
    }

    /// Concurrently cancels every task in `category`, awaiting the aggregate.
    ///
    /// Returns the number of tasks cancelled.
    pub async fn cancel_category(&self, category: &str) -> usize {
        let entries: Vec<TaskEntry> = {
            let mut tables = self.tables.lock().await;
            match tables.categories.get_mut(category) {
                Some(slot) => slot.drain().map(|(_, entry)| entry).collect(),
                None => return 0,
            }
        };
        let count = entries.len();
        join_all(entries.into_iter().map(|entry| async move {
            entry.token.cancel();
            let mut done = entry.done;
            await_settled(&mut done).await;
        }))
        .await;
        self.finish_category_if_empty(category).await;
        count
    }

    /// Concurrently cancels every category.
    pub async fn cancel_all(&self) -> usize {
        let categories: Vec<String> = {
            let tables = self.tables.lock().await;
            tables.categories.keys().cloned().collect()
        };
        join_all(
            categories
                .iter()
                .map(|category| self.cancel_category(category)),
        )
        .await
        .into_iter()
        .sum()
    }

    /// Kills this supervisor: cancels everything and deregisters it.
    ///
    /// Idempotent: a second call warns and returns. Deregistration happens
    /// even if cancellation misbehaves — a dangling registry entry is worse
    /// than a failed-but-removed one.
    pub async fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            warn!(manager = %self.id, "kill called on an already-killed task manager");
            return;
        }
        self.kill_signal.cancel();
        self.cancel_all().await;

        let owner = self
            .owner
            .lock()
            .expect("owner lock poisoned")
            .clone()
            .and_then(|weak| weak.upgrade());
        if let Some(registry) = owner {
            registry.remove(&self.id);
        }
    }

    /// True when a live task exists at `(category, id)`.
    pub async fn task_exists(&self, category: &str, id: &str) -> bool {
        let tables = self.tables.lock().await;
        tables
            .categories
            .get(category)
            .is_some_and(|slot| slot.contains_key(id))
    }

    /// Total number of live tasks across all categories.
    pub async fn task_count(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.categories.values().map(HashMap::len).sum()
    }

    /// Sorted list of categories with live tasks.
    pub async fn categories(&self) -> Vec<String> {
        let tables = self.tables.lock().await;
        let mut names: Vec<String> = tables.categories.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Resolves once `category` has no live tasks.
    ///
    /// Resolves immediately when the category does not exist.
    pub async fn category_done(&self, category: &str) {
        let mut rx = {
            let tables = self.tables.lock().await;
            match tables.category_done.get(category) {
                Some(tx) => tx.subscribe(),
                None => return,
            }
        };
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Cancels exactly one task and awaits its settlement.
    async fn cancel_task(&self, category: &str, id: &str) -> bool {
        let entry = {
            let mut tables = self.tables.lock().await;
            match tables.categories.get_mut(category) {
                Some(slot) => slot.remove(id),
                None => return false,
            }
        };
        let Some(entry) = entry else {
            return false;
        };
        entry.token.cancel();
        let mut done = entry.done;
        await_settled(&mut done).await;
        self.finish_category_if_empty(category).await;
        true
    }

    /// Deletes an emptied category and fires its done signal exactly once.
    async fn finish_category_if_empty(&self, category: &str) {
        let signal = {
            let mut tables = self.tables.lock().await;
            match tables.categories.get(category) {
                Some(slot) if slot.is_empty() => {
                    tables.categories.remove(category);
                    tables.category_done.remove(category)
                }
                _ => None,
            }
        };
        if let Some(tx) = signal {
            let _ = tx.send(true);
        }
    }

    /// Detached unit that removes the task from the table once it settles.
    fn spawn_cleanup(self: &Arc<Self>, category: String, id: String, seq: u64, mut done: DoneReceiver) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let result = await_settled(&mut done).await;
            let removed = {
                let mut tables = sup.tables.lock().await;
                match tables.categories.get_mut(&category) {
                    // Identity check: a replacement may already occupy the key.
                    Some(slot) if slot.get(&id).map(|e| e.seq) == Some(seq) => {
                        slot.remove(&id);
                        true
                    }
                    _ => false,
                }
            };
            if removed {
                if sup.config.log {
                    if sup.config.log_collapsed {
                        debug!(
                            icon = %sup.config.icon,
                            manager = %sup.id,
                            category = %category,
                            id = %id,
                            "task complete"
                        );
                    } else {
                        debug!(
                            icon = %sup.config.icon,
                            manager = %sup.id,
                            category = %category,
                            id = %id,
                            result = ?result,
                            "task complete"
                        );
                    }
                }
                sup.finish_category_if_empty(&category).await;
            }
        });
    }

    /// One watcher per supervisor: reacts to the kill signal by cancelling
    /// every live task. Started lazily by the first `create`.
    fn spawn_kill_watcher(self: &Arc<Self>) {
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            sup.kill_signal.cancelled().await;
            if sup.config.log {
                warn!(manager = %sup.id, "task manager killed");
            }
            sup.cancel_all().await;
        });
    }
}

/// Root wrapper around one task body.
///
/// Catches errors and panics so nothing propagates past the supervisor
/// boundary, and races the body against its cancellation token so teardown
/// (drop handlers) runs promptly on cancellation.
async fn run_task_root<F, Fut>(
    job: F,
    token: CancellationToken,
    context: &TaskContext,
    replaced: bool,
) -> TaskResult
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    if replaced {
        tokio::select! {
            _ = token.cancelled() => return Err(TaskError::Canceled),
            _ = tokio::time::sleep(GRACE_TICK) => {}
        }
    }

    let body = std::panic::AssertUnwindSafe(job(token.clone())).catch_unwind();
    tokio::select! {
        _ = token.cancelled() => Err(TaskError::Canceled),
        caught = body => match caught {
            Ok(Ok(())) => Ok(()),
            Ok(Err(TaskError::Canceled)) => Err(TaskError::Canceled),
            Ok(Err(e)) => {
                error!(
                    category = %context.category,
                    id = %context.id,
                    error = %e,
                    "uncaught error while running task"
                );
                Err(e)
            }
            Err(panic) => {
                let info = panic_message(panic.as_ref());
                error!(
                    category = %context.category,
                    id = %context.id,
                    panic = %info,
                    "task body panicked"
                );
                Err(TaskError::Fatal { error: info })
            }
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
