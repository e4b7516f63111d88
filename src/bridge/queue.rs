//! # The publish/next pairing primitive.
//!
//! [`EventBridge`] lets producers call [`publish`](EventBridge::publish) and
//! consumers call [`next`](EventBridge::next) in any order, pairing them up
//! FIFO without dropping values or leaving a consumer unresolved while the
//! stream is alive.
//!
//! ## Architecture
//! ```text
//! publish(v) ──► waiter pending? ──► resolve oldest waiter with v
//!                      │
//!                      └─ no ──► ready queue (already-settled slot)
//!
//! next() ──► ready value pending? ──► immediately-settled future
//!                  │
//!                  └─ no ──► Shift: fresh waiter, strict FIFO handout
//!                            Next:  shared wait slot, every caller observes
//!                                   the same next value (fan-out)
//! ```
//!
//! ## Rules
//! - In steady state at most one of {ready queue, waiter queue} is non-empty:
//!   publishing while a consumer waits resolves that consumer directly.
//! - `done(result)` settles every pending waiter with `result` and disables
//!   the stream; `cancel()` rejects them with [`BridgeError::Cancelled`] and
//!   deletes queue state.
//! - After either, `publish` degrades to a logged no-op (a producer's hot
//!   path must not fail merely because the stream ended) while `next` fails
//!   loudly.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::BridgeError;

/// How `next()` hands out values that have not arrived yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueStyle {
    /// Every pending `next()` call shares one wait slot: N concurrent
    /// consumers all observe the same next value (fan-out).
    Next,
    /// Every `next()` call gets its own slot: values are handed out strictly
    /// one-each in arrival order (FIFO distribution).
    Shift,
}

/// Construction-time options for an [`EventBridge`].
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Name used in diagnostics.
    pub name: String,
    /// Pending-consumer handout style.
    pub style: QueueStyle,
    /// Emit a warning when `publish` is called on an ended stream.
    pub log: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "bridge".to_string(),
            style: QueueStyle::Next,
            log: false,
        }
    }
}

type Settled<T> = Result<T, BridgeError>;
type SharedSlot<T> = Shared<BoxFuture<'static, Settled<T>>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Done,
    Cancelled,
}

struct Queues<T: Clone> {
    /// Published values waiting for a consumer, oldest first.
    ready: VecDeque<Settled<T>>,
    /// Consumers waiting for a value, oldest first.
    waiters: VecDeque<oneshot::Sender<Settled<T>>>,
    /// Shared wait slot for [`QueueStyle::Next`].
    current: Option<SharedSlot<T>>,
    state: StreamState,
}

/// Bridge between "publish now" and "consume next" operations.
///
/// See the [module docs](self) for the pairing rules. `T` is one published
/// batch; it must be `Clone` so that the `Next` style can fan a single value
/// out to every consumer sharing the wait slot.
pub struct EventBridge<T: Clone + Send + Sync + 'static> {
    config: BridgeConfig,
    queues: Mutex<Queues<T>>,
}

impl<T: Clone + Send + Sync + 'static> EventBridge<T> {
    /// Creates a bridge with the given configuration.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(Queues {
                ready: VecDeque::new(),
                waiters: VecDeque::new(),
                current: None,
                state: StreamState::Open,
            }),
        }
    }

    /// Creates a named bridge with the given handout style.
    pub fn with_style(name: impl Into<String>, style: QueueStyle) -> Self {
        Self::new(BridgeConfig {
            name: name.into(),
            style,
            ..BridgeConfig::default()
        })
    }

    /// Bridge name as configured.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Publishes one value batch.
    ///
    /// If a consumer is already waiting, the oldest waiter is resolved
    /// directly; otherwise the batch is queued until someone asks. Once the
    /// stream has ended this is a logged no-op, never an error.
    pub fn publish(&self, batch: T) {
        self.push(Ok(batch));
    }

    /// Pushes a rejection to the next consumer instead of a value.
    pub fn fault(&self, reason: impl Into<String>) {
        let reason: String = reason.into();
        self.push(Err(BridgeError::Faulted(reason.into())));
    }

    fn push(&self, settled: Settled<T>) {
        let mut q = self.queues.lock().expect("bridge state poisoned");
        if q.state != StreamState::Open {
            if self.config.log {
                warn!(bridge = %self.config.name, "publish received after stream ended");
            }
            return;
        }
        let mut settled = settled;
        while let Some(waiter) = q.waiters.pop_front() {
            match waiter.send(settled) {
                Ok(()) => return,
                // Consumer dropped its future; hand the value to the next one.
                Err(value) => settled = value,
            }
        }
        q.ready.push_back(settled);
    }

    /// Returns a future resolving to the next published value.
    ///
    /// - A value already queued resolves immediately, whatever the style.
    /// - `Shift` style: each call advances the queue by exactly one slot.
    /// - `Next` style: concurrent calls share the same wait slot until it
    ///   settles; a later call creates a fresh one.
    /// - After [`cancel`](Self::cancel) resolves to
    ///   [`BridgeError::Cancelled`]; after [`done`](Self::done) to
    ///   [`BridgeError::Finished`].
    pub fn next(&self) -> BoxFuture<'static, Settled<T>> {
        let mut q = self.queues.lock().expect("bridge state poisoned");
        match q.state {
            StreamState::Cancelled => {
                return futures::future::ready(Err(BridgeError::Cancelled)).boxed()
            }
            StreamState::Done => return futures::future::ready(Err(BridgeError::Finished)).boxed(),
            StreamState::Open => {}
        }
        if let Some(settled) = q.ready.pop_front() {
            return futures::future::ready(settled).boxed();
        }
        match self.config.style {
            QueueStyle::Shift => Self::park(&mut q).boxed(),
            QueueStyle::Next => {
                if let Some(slot) = &q.current {
                    if slot.peek().is_none() {
                        return slot.clone().boxed();
                    }
                }
                let slot = Self::park(&mut q).boxed().shared();
                q.current = Some(slot.clone());
                slot.boxed()
            }
        }
    }

    /// Enqueues a fresh waiter and returns the future that observes it.
    fn park(q: &mut Queues<T>) -> impl std::future::Future<Output = Settled<T>> + Send {
        let (tx, rx) = oneshot::channel::<Settled<T>>();
        q.waiters.push_back(tx);
        rx.map(|received| match received {
            Ok(settled) => settled,
            // Sender dropped without settling: the bridge went away.
            Err(_) => Err(BridgeError::Cancelled),
        })
    }

    /// Ends the stream, settling every pending consumer with `result`.
    ///
    /// Idempotent: a second call (or a call after `cancel`) is a no-op.
    /// Afterwards `next` fails with [`BridgeError::Finished`] and `publish`
    /// warns and no-ops.
    pub fn done(&self, result: T) {
        let drained = {
            let mut q = self.queues.lock().expect("bridge state poisoned");
            if q.state != StreamState::Open {
                return;
            }
            q.state = StreamState::Done;
            q.current = None;
            std::mem::take(&mut q.waiters)
        };
        for waiter in drained {
            let _ = waiter.send(Ok(result.clone()));
        }
    }

    /// Cancels the stream, rejecting every pending consumer with
    /// [`BridgeError::Cancelled`] and deleting queue state.
    ///
    /// Idempotent: a second call (or a call after `done`) is a no-op.
    pub fn cancel(&self) {
        let drained = {
            let mut q = self.queues.lock().expect("bridge state poisoned");
            if q.state != StreamState::Open {
                return;
            }
            q.state = StreamState::Cancelled;
            q.current = None;
            q.ready.clear();
            std::mem::take(&mut q.waiters)
        };
        for waiter in drained {
            let _ = waiter.send(Err(BridgeError::Cancelled));
        }
    }

    /// True once [`cancel`](Self::cancel) has run.
    pub fn cancelled(&self) -> bool {
        self.queues.lock().expect("bridge state poisoned").state == StreamState::Cancelled
    }

    /// True once [`done`](Self::done) has run.
    pub fn finished(&self) -> bool {
        self.queues.lock().expect("bridge state poisoned").state == StreamState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn bridge(style: QueueStyle) -> EventBridge<Vec<Value>> {
        EventBridge::with_style("test", style)
    }

    #[tokio::test]
    async fn test_publish_then_next_resolves_immediately() {
        let b = bridge(QueueStyle::Next);
        b.publish(vec![json!("evt"), json!({"k": 1})]);

        let got = b.next().await.unwrap();
        assert_eq!(got, vec![json!("evt"), json!({"k": 1})]);
    }

    #[tokio::test]
    async fn test_next_style_fans_out_to_concurrent_consumers() {
        let b = bridge(QueueStyle::Next);
        let first = b.next();
        let second = b.next();

        b.publish(vec![json!("x")]);

        assert_eq!(first.await.unwrap(), vec![json!("x")]);
        assert_eq!(second.await.unwrap(), vec![json!("x")]);
    }

    #[tokio::test]
    async fn test_next_style_slot_refreshes_after_settling() {
        let b = bridge(QueueStyle::Next);
        let first = b.next();
        b.publish(vec![json!(1)]);
        assert_eq!(first.await.unwrap(), vec![json!(1)]);

        let second = b.next();
        b.publish(vec![json!(2)]);
        assert_eq!(second.await.unwrap(), vec![json!(2)]);
    }

    #[tokio::test]
    async fn test_shift_style_hands_out_first_two_values_fifo() {
        let b = bridge(QueueStyle::Shift);
        let first = b.next();
        let second = b.next();

        b.publish(vec![json!("a")]);
        b.publish(vec![json!("b")]);

        assert_eq!(first.await.unwrap(), vec![json!("a")]);
        assert_eq!(second.await.unwrap(), vec![json!("b")]);
    }

    #[tokio::test]
    async fn test_shift_style_preserves_publish_order_when_draining() {
        let b = bridge(QueueStyle::Shift);
        b.publish(vec![json!("a")]);
        b.publish(vec![json!("b")]);
        b.publish(vec![json!("c")]);

        assert_eq!(b.next().await.unwrap(), vec![json!("a")]);
        assert_eq!(b.next().await.unwrap(), vec![json!("b")]);
        assert_eq!(b.next().await.unwrap(), vec![json!("c")]);
    }

    #[tokio::test]
    async fn test_done_flushes_waiters_and_disables_stream() {
        let b = bridge(QueueStyle::Shift);
        let pending = b.next();

        b.done(vec![json!("final")]);

        assert_eq!(pending.await.unwrap(), vec![json!("final")]);
        assert!(b.finished());
        assert!(!b.cancelled());
        assert_eq!(b.next().await.unwrap_err(), BridgeError::Finished);

        // Ended-stream publish must not panic nor resurrect the queue.
        b.publish(vec![json!("late")]);
        assert_eq!(b.next().await.unwrap_err(), BridgeError::Finished);
    }

    #[tokio::test]
    async fn test_cancel_rejects_waiters_with_distinguished_reason() {
        let b = bridge(QueueStyle::Next);
        let pending = b.next();

        b.cancel();

        assert_eq!(pending.await.unwrap_err(), BridgeError::Cancelled);
        assert!(b.cancelled());
        assert_eq!(b.next().await.unwrap_err(), BridgeError::Cancelled);
    }

    #[tokio::test]
    async fn test_done_and_cancel_are_idempotent() {
        let b = bridge(QueueStyle::Next);
        b.done(vec![json!(1)]);
        b.done(vec![json!(2)]);
        b.cancel();

        // First terminal state wins.
        assert!(b.finished());
        assert!(!b.cancelled());
    }

    #[tokio::test]
    async fn test_fault_delivers_rejection_in_arrival_order() {
        let b = bridge(QueueStyle::Shift);
        b.publish(vec![json!("ok")]);
        b.fault("boom");

        assert_eq!(b.next().await.unwrap(), vec![json!("ok")]);
        match b.next().await.unwrap_err() {
            BridgeError::Faulted(reason) => assert_eq!(&*reason, "boom"),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_resolves_waiting_consumer_directly() {
        let b = bridge(QueueStyle::Shift);
        let pending = b.next();
        b.publish(vec![json!("direct")]);

        // The value went to the waiter, not the ready queue.
        assert_eq!(pending.await.unwrap(), vec![json!("direct")]);
        let unresolved = b.next();
        b.publish(vec![json!("second")]);
        assert_eq!(unresolved.await.unwrap(), vec![json!("second")]);
    }
}
