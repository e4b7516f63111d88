//! Error types used by the procvisor runtime and tasks.
//!
//! This module defines the error enums for each layer of the crate:
//!
//! - [`TaskError`] — errors raised by individual task executions.
//! - [`SupervisorError`] — configuration/programmer errors raised synchronously
//!   by supervisor operations such as `create`.
//! - [`BridgeError`] — terminal reasons delivered through an event bridge's
//!   `next()`; cancellation is distinguishable from completion by match.
//! - [`ObserverError`] — listener registration failures, fatal to one observer.
//!
//! Task-body errors never propagate past the supervisor boundary: they are
//! caught at the task root and become the task's settled result. Only
//! [`SupervisorError`] is returned to the direct caller of an operation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by task execution.
///
/// These represent failures of individual async tasks managed by a
/// [`Supervisor`](crate::Supervisor). A task settles with its error as the
/// result, inspectable through [`TaskHandle`](crate::TaskHandle).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Task execution exceeded its timeout duration.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error, including panics caught at the task root.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Task execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Task was cancelled cooperatively.
    #[error("task cancelled")]
    Canceled,
}

impl TaskError {
    /// Builds a [`TaskError::Fail`] from any displayable error.
    pub fn fail(error: impl std::fmt::Display) -> Self {
        TaskError::Fail {
            error: error.to_string(),
        }
    }

    /// Builds a [`TaskError::Fatal`] from any displayable error.
    pub fn fatal(error: impl std::fmt::Display) -> Self {
        TaskError::Fatal {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// True when the error marks a cooperative cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

/// # Errors raised synchronously by supervisor operations.
///
/// These are configuration or programmer errors: they are surfaced to the
/// direct caller of `create` and friends, and are fatal to that call only.
/// The `silent` config flag may swallow the non-critical ones; critical
/// errors (slot conflicts that would corrupt the task table) are never
/// suppressed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Task creation requires a non-empty category and id.
    #[error("tasks must have a category and id at a minimum, received {category:?}.{id:?}")]
    MissingTaskKey {
        /// Category as received.
        category: String,
        /// Id as received.
        id: String,
    },

    /// A live task already occupies this key and overwrite is disabled.
    #[error("task {category}.{id} already exists; cancel it before scheduling it again")]
    TaskExists {
        /// Category of the conflicting task.
        category: String,
        /// Id of the conflicting task.
        id: String,
    },

    /// The slot was occupied at insertion time. Invariant violation: the key
    /// should have been cleared before the replacement was spawned.
    #[error("failed to save task {category}.{id}: slot already occupied")]
    SaveConflict {
        /// Category of the conflicting task.
        category: String,
        /// Id of the conflicting task.
        id: String,
    },

    /// The supervisor was killed; it no longer accepts tasks.
    #[error("task manager {manager} has been killed")]
    Killed {
        /// Name of the killed manager.
        manager: String,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::MissingTaskKey { .. } => "missing_task_key",
            SupervisorError::TaskExists { .. } => "task_exists",
            SupervisorError::SaveConflict { .. } => "save_conflict",
            SupervisorError::Killed { .. } => "manager_killed",
        }
    }

    /// Critical errors are never swallowed by silent mode.
    pub fn is_critical(&self) -> bool {
        matches!(self, SupervisorError::SaveConflict { .. })
    }
}

/// # Terminal reasons delivered through [`EventBridge::next`](crate::EventBridge::next).
///
/// Consumers must be able to tell cancellation apart from normal completion,
/// so each terminal state carries its own variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The bridge was cancelled while this consumer was waiting.
    #[error("bridge cancelled")]
    Cancelled,

    /// `next` was called after the bridge finished. Consuming an ended
    /// stream is a caller-side bug and fails loudly.
    #[error("next called after completion")]
    Finished,

    /// A producer pushed a rejection into the stream.
    #[error("stream fault: {0}")]
    Faulted(Arc<str>),
}

/// # Listener lifecycle failures in an [`EventObserver`](crate::EventObserver).
///
/// Registration and de-registration errors are fatal to the observer instance
/// and propagate to its caller; handler errors never are.
#[derive(Error, Debug, Clone)]
pub enum ObserverError {
    /// The event source refused to register a listener.
    #[error("failed to register listener for {event:?}: {reason}")]
    Register {
        /// Event the listener was meant for.
        event: String,
        /// Source-provided reason.
        reason: String,
    },

    /// The event source refused to unregister a listener.
    #[error("failed to unregister listener for {event:?}: {reason}")]
    Unregister {
        /// Event the listener was registered for.
        event: String,
        /// Source-provided reason.
        reason: String,
    },
}
