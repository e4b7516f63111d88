//! Event bridging: push-to-pull adaptation.
//!
//! This module converts push-style callback events into pull-style sequential
//! consumption:
//!
//! - [`EventBridge`] pairs `publish` and `next` calls FIFO in any
//!   interleaving, absorbing values published before anyone asked and parking
//!   consumers that ask before anything was published.
//! - [`EventObserver`] owns the subscribe/unsubscribe lifecycle against a
//!   callback-style [`EventSource`] and feeds everything it hears into a
//!   bridge, dispatching each value to a handler without serializing the loop.

mod observer;
mod queue;

pub use observer::{
    CancelHandler, EventHandler, EventObserver, EventRecord, EventSource, FaultHandler, Listener,
    ObserverHandlers,
};
pub use queue::{BridgeConfig, EventBridge, QueueStyle};
