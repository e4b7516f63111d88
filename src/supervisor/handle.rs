//! # Task handles, context, and settlement.
//!
//! A supervised task is addressed by `(category, id)` and settles exactly
//! once with a [`TaskResult`]. Settlement is broadcast through a `watch`
//! channel so the supervisor's cleanup unit, `cancel` callers, and any number
//! of [`TaskHandle`] holders can all observe it independently.
//!
//! State machine per task:
//! ```text
//! Running ──► Completed   (body returned Ok)
//!         ──► Cancelled   (token fired, body dropped mid-await)
//!         ──► Errored     (body returned Err / panicked at the root)
//! ```
//! No task leaves a terminal state.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Settled result of one supervised task.
///
/// A cancelled task settles with [`TaskError::Canceled`]; an errored task
/// settles with its error value so callers awaiting completion can inspect
/// it. Nothing upstream ever receives the error as an exception.
pub type TaskResult = Result<(), TaskError>;

pub(crate) type DoneReceiver = watch::Receiver<Option<TaskResult>>;

/// Coarse task state, derived from the settled result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Body still executing.
    Running,
    /// Settled with `Ok`.
    Completed,
    /// Settled with [`TaskError::Canceled`].
    Cancelled,
    /// Settled with any other error.
    Errored,
}

/// Identity of one supervised task.
#[derive(Clone, Debug)]
pub struct TaskContext {
    /// Namespace grouping related tasks.
    pub category: Arc<str>,
    /// Identity within the category.
    pub id: Arc<str>,
    /// Creation instant, used for duration diagnostics.
    pub created: Instant,
}

impl TaskContext {
    pub(crate) fn new(category: &str, id: &str) -> Self {
        Self {
            category: Arc::from(category),
            id: Arc::from(id),
            created: Instant::now(),
        }
    }
}

/// Caller-side handle to one supervised task.
///
/// Dropping the handle does not affect the task; cancellation goes through
/// the supervisor (or [`TaskHandle::cancel`], which fires the same token).
#[derive(Clone, Debug)]
pub struct TaskHandle {
    pub(crate) context: TaskContext,
    pub(crate) token: CancellationToken,
    pub(crate) done: DoneReceiver,
}

impl TaskHandle {
    /// The task's `(category, id, created)` identity.
    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// True while the task has not settled.
    pub fn is_running(&self) -> bool {
        self.done.borrow().is_none()
    }

    /// The settled result, if the task has settled.
    pub fn result(&self) -> Option<TaskResult> {
        self.done.borrow().clone()
    }

    /// Current status derived from the settled result.
    pub fn status(&self) -> TaskStatus {
        match self.result() {
            None => TaskStatus::Running,
            Some(Ok(())) => TaskStatus::Completed,
            Some(Err(TaskError::Canceled)) => TaskStatus::Cancelled,
            Some(Err(_)) => TaskStatus::Errored,
        }
    }

    /// Fires the task's cancellation token.
    ///
    /// The supervisor's cleanup unit still removes the task from the table
    /// once it settles.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for settlement and returns the result.
    pub async fn done(&mut self) -> TaskResult {
        match await_settled(&mut self.done).await {
            Some(result) => result,
            // Root dropped without settling (runtime teardown).
            None => Err(TaskError::Canceled),
        }
    }
}

/// Waits until the watch channel carries a settled result.
///
/// Returns `None` when the sender is gone without ever settling.
pub(crate) async fn await_settled(done: &mut DoneReceiver) -> Option<TaskResult> {
    loop {
        if let Some(result) = done.borrow_and_update().clone() {
            return Some(result);
        }
        if done.changed().await.is_err() {
            return None;
        }
    }
}
