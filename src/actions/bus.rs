//! # Action bus for broadcasting dispatched actions.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking publishing from multiple sources (processes, application
//! code, the runtime) to any number of subscribers.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls
//!   `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent actions for all
//!   receivers; the minimum capacity is 1 (clamped).
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip the
//!   `n` oldest items.
//! - **No persistence**: actions are lost if no subscriber is attached at
//!   send time.

use tokio::sync::broadcast;

use super::action::{Action, ActionPattern};

/// Broadcast channel for dispatched actions.
///
/// Cheap to clone (internally holds an `Arc`-backed sender). Multiple
/// publishers can publish concurrently; subscribers receive clones of each
/// action.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Action>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1, clamped).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Action>(capacity);
        Self { tx }
    }

    /// Publishes an action to all active subscribers.
    ///
    /// If there are no receivers the action is dropped; this function still
    /// returns immediately.
    pub fn publish(&self, action: Action) {
        let _ = self.tx.send(action);
    }

    /// Publishes a borrowed action by cloning it.
    pub fn publish_ref(&self, action: &Action) {
        let _ = self.tx.send(action.clone());
    }

    /// Creates a new receiver that observes subsequent actions.
    ///
    /// Each call creates an **independent** receiver; a receiver only gets
    /// actions sent after it subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.tx.subscribe()
    }

    /// Waits for the next action matching `pattern`.
    ///
    /// Subscribes first, so only actions published after the call are
    /// considered. Lagged receivers skip missed items and keep waiting.
    /// Returns `None` if the channel closes before a match arrives.
    pub async fn wait_for(&self, pattern: &ActionPattern) -> Option<Action> {
        let mut rx = self.subscribe();
        loop {
            match rx.recv().await {
                Ok(action) if pattern.matches(&action) => return Some(action),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_skips_non_matching() {
        let bus = Bus::new(8);
        let pattern = ActionPattern::Kind("PONG".into());

        let waiter = {
            let bus = bus.clone();
            let pattern = pattern.clone();
            tokio::spawn(async move { bus.wait_for(&pattern).await })
        };
        tokio::task::yield_now().await;

        bus.publish(Action::new("PING"));
        bus.publish(Action::new("PONG"));

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.kind, "PONG");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = Bus::new(1);
        bus.publish(Action::new("LOST"));

        let mut rx = bus.subscribe();
        bus.publish(Action::new("SEEN"));
        assert_eq!(rx.recv().await.unwrap().kind, "SEEN");
    }
}
