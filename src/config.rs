//! # Supervisor configuration.
//!
//! [`SupervisorConfig`] centralizes the per-manager policy switches:
//!
//! 1. **Overwrite semantics**: whether scheduling over a live `(category, id)`
//!    key cancels-and-replaces it, or is rejected.
//! 2. **Silent mode**: whether non-critical configuration errors are swallowed
//!    (logged, not returned). Critical errors are surfaced regardless.
//! 3. **Logging**: whether the manager emits task lifecycle diagnostics.
//!
//! ## Field semantics
//! - `overwrite = true` → a second `create` at a live key first cancels the
//!   existing task (awaited), then schedules the replacement.
//! - `overwrite = false` → a second `create` at a live key is an error unless
//!   `silent` turns it into a logged no-op.
//! - `silent` never suppresses critical errors — a slot conflict that would
//!   corrupt the task table is always surfaced.

/// Per-manager configuration for a [`Supervisor`](crate::Supervisor).
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Human-readable manager name used in diagnostics.
    pub name: String,

    /// Cancel-and-replace a live task when scheduling over its key.
    ///
    /// When false, scheduling over a live key is rejected with
    /// [`SupervisorError::TaskExists`](crate::SupervisorError::TaskExists)
    /// unless `silent` is set.
    pub overwrite: bool,

    /// Swallow non-critical configuration errors (logged, not returned).
    pub silent: bool,

    /// Emit task lifecycle diagnostics through `tracing`.
    pub log: bool,

    /// Compact lifecycle diagnostics: omit per-task results and durations.
    pub log_collapsed: bool,

    /// Marker prepended to this manager's diagnostics.
    pub icon: String,
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `name = "taskman"`
    /// - `overwrite = true` (cancel-and-replace)
    /// - `silent = false`
    /// - `log = false`
    /// - `log_collapsed = true`
    fn default() -> Self {
        Self {
            name: "taskman".to_string(),
            overwrite: true,
            silent: false,
            log: false,
            log_collapsed: true,
            icon: "📟".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Returns a config with the given name and defaults otherwise.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
