//! Actions: the data model and broadcast bus.
//!
//! This module groups the action **data model** and the **bus** used to
//! publish/subscribe to actions flowing between processes, the task
//! supervisor's `take` family, and application code.
//!
//! ## Contents
//! - [`Action`], [`ActionPattern`] — the dispatched value and match patterns
//! - [`Bus`] — thin wrapper over `tokio::sync::broadcast`
//! - [`to_action_type`] — the deterministic creator-name → action-type transform

mod action;
mod bus;

pub use action::{to_action_type, Action, ActionPattern};
pub use bus::Bus;
