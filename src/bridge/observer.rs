//! # Event observer: callback source → sequential consumption.
//!
//! [`EventObserver`] bridges a callback-registration event source (anything
//! implementing [`EventSource`]) into one-at-a-time consumption through an
//! [`EventBridge`](super::EventBridge).
//!
//! ## Flow
//! ```text
//! source ── listener callback ──► bridge.publish(record)
//!                                       │
//! run(token):  loop ── bridge.next() ──►┴─► spawn on_event(record)
//!                         │                  (detached; a slow handler never
//!                         │                   delays the following event)
//!                         └─ rejection ──► on_error / on_cancel
//! ```
//!
//! ## Rules
//! - One listener is registered per named event before the loop starts;
//!   **every** registered listener is unregistered on **every** exit path
//!   (normal end, error, external cancellation).
//! - Registration/unregistration failures are fatal to this observer and
//!   propagate; handler failures are isolated to one dispatch.
//! - If the bridge reports cancellation, `on_cancel` is invoked exactly once.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::queue::{BridgeConfig, EventBridge, QueueStyle};
use crate::error::{BridgeError, ObserverError};

/// Callback handed to an [`EventSource`]; receives `(event_name, payload)`.
pub type Listener = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Handler for each observed event record.
pub type EventHandler = Arc<dyn Fn(EventRecord) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handler for a rejection observed while awaiting the bridge.
pub type FaultHandler = Arc<dyn Fn(BridgeError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handler invoked once when the observed stream is cancelled.
pub type CancelHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Anything that can register and unregister callback-based listeners.
///
/// One listener per `(observer, event)` pair is assumed: `remove_listener`
/// drops whatever this observer registered under `event`.
pub trait EventSource: Send + Sync {
    /// Registers `listener` for `event`.
    fn add_listener(&self, event: &str, listener: Listener) -> Result<(), ObserverError>;

    /// Unregisters the listener previously registered for `event`.
    fn remove_listener(&self, event: &str) -> Result<(), ObserverError>;
}

/// One observed event: the event name plus whatever the source published.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// Name of the event the listener was registered for.
    pub event: Arc<str>,
    /// Source-provided payload.
    pub payload: Value,
}

/// Handler wiring for an [`EventObserver`].
#[derive(Clone)]
pub struct ObserverHandlers {
    /// Invoked for every observed record, on a detached task.
    pub on_event: EventHandler,
    /// Invoked for a rejection observed while awaiting `next()`.
    pub on_error: Option<FaultHandler>,
    /// Invoked exactly once if the stream was cancelled.
    pub on_cancel: Option<CancelHandler>,
}

impl ObserverHandlers {
    /// Wires an event handler with no error/cancel hooks.
    pub fn new(on_event: EventHandler) -> Self {
        Self {
            on_event,
            on_error: None,
            on_cancel: None,
        }
    }
}

enum LoopExit {
    /// Token fired or the bridge finished normally.
    Ended,
    /// The bridge was cancelled from outside.
    Cancelled,
    /// A producer pushed a rejection.
    Faulted(BridgeError),
}

/// Adapter that owns listener lifecycle against one [`EventSource`] and
/// dispatches observed events without blocking its own loop.
pub struct EventObserver {
    uid: Arc<str>,
    events: Vec<String>,
    source: Arc<dyn EventSource>,
    handlers: ObserverHandlers,
    bridge: Arc<EventBridge<EventRecord>>,
}

impl EventObserver {
    /// Creates an observer for the named events on `source`.
    pub fn new(
        uid: impl Into<Arc<str>>,
        source: Arc<dyn EventSource>,
        events: Vec<String>,
        handlers: ObserverHandlers,
    ) -> Self {
        let uid = uid.into();
        let bridge = Arc::new(EventBridge::new(BridgeConfig {
            name: uid.to_string(),
            style: QueueStyle::Next,
            log: false,
        }));
        Self {
            uid,
            events,
            source,
            handlers,
            bridge,
        }
    }

    /// The bridge this observer consumes from.
    ///
    /// External code may end the stream through it (`done`, `cancel`,
    /// `fault`); the observer reacts on its next loop turn.
    pub fn bridge(&self) -> &Arc<EventBridge<EventRecord>> {
        &self.bridge
    }

    /// Observer identifier as configured.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Registers listeners, consumes the stream until it ends, and tears the
    /// listeners down again.
    ///
    /// Cancelling `token` cancels the bridge and exits cleanly. Returns an
    /// error only for listener registration/unregistration failures.
    pub async fn run(&self, token: CancellationToken) -> Result<(), ObserverError> {
        let mut registered: Vec<String> = Vec::with_capacity(self.events.len());
        let mut setup_err: Option<ObserverError> = None;

        for event in &self.events {
            let bridge = Arc::clone(&self.bridge);
            let listener: Listener = Arc::new(move |name: &str, payload: Value| {
                bridge.publish(EventRecord {
                    event: Arc::from(name),
                    payload,
                });
            });
            match self.source.add_listener(event, listener) {
                Ok(()) => registered.push(event.clone()),
                Err(e) => {
                    setup_err = Some(e);
                    break;
                }
            }
        }

        let outcome = if setup_err.is_some() {
            LoopExit::Ended
        } else {
            self.observe(&token).await
        };

        // Unregistration runs on every exit path, including a failed setup
        // that registered only part of the listener set.
        let mut teardown_err: Option<ObserverError> = None;
        for event in &registered {
            if let Err(e) = self.source.remove_listener(event) {
                warn!(observer = %self.uid, event = %event, error = %e, "listener unregistration failed");
                teardown_err.get_or_insert(e);
            }
        }

        match outcome {
            LoopExit::Faulted(reason) => {
                if let Some(on_error) = &self.handlers.on_error {
                    on_error(reason).await;
                }
            }
            LoopExit::Cancelled => {
                if let Some(on_error) = &self.handlers.on_error {
                    on_error(BridgeError::Cancelled).await;
                }
            }
            LoopExit::Ended => {}
        }
        if self.bridge.cancelled() {
            if let Some(on_cancel) = &self.handlers.on_cancel {
                on_cancel().await;
            }
        }

        if let Some(e) = setup_err {
            return Err(e);
        }
        if let Some(e) = teardown_err {
            return Err(e);
        }
        Ok(())
    }

    async fn observe(&self, token: &CancellationToken) -> LoopExit {
        loop {
            let next = self.bridge.next();
            tokio::select! {
                _ = token.cancelled() => {
                    self.bridge.cancel();
                    return LoopExit::Ended;
                }
                settled = next => match settled {
                    Ok(record) => {
                        let handler = Arc::clone(&self.handlers.on_event);
                        tokio::spawn(handler(record));
                    }
                    Err(BridgeError::Cancelled) => return LoopExit::Cancelled,
                    Err(BridgeError::Finished) => return LoopExit::Ended,
                    Err(fault) => return LoopExit::Faulted(fault),
                }
            }
        }
    }
}
