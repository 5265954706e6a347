//! "Scroll to top" broadcast between the feed and whatever renders it.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollReason {
    /// A refresh replaced the visible list.
    Refreshed,
    /// The user asked to jump back (e.g. tapped the active tab).
    Requested,
}

/// Publish/subscribe hub. Cloning shares the same set of subscribers.
#[derive(Debug, Clone)]
pub struct ScrollToTop {
    tx: broadcast::Sender<ScrollReason>,
}

impl ScrollToTop {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Start listening. Dropping the returned subscription unsubscribes.
    pub fn subscribe(&self) -> ScrollSubscription {
        ScrollSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Notify every current subscriber; returns how many were reached.
    pub fn trigger(&self, reason: ScrollReason) -> usize {
        let reached = self.tx.send(reason).unwrap_or(0);
        debug!(?reason, reached, "scroll-to-top triggered");
        reached
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ScrollToTop {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ScrollSubscription {
    rx: broadcast::Receiver<ScrollReason>,
}

impl ScrollSubscription {
    /// Next signal, or `None` once every publisher is gone.
    ///
    /// Signals are idempotent, so a lagging subscriber just sees the latest.
    pub async fn recv(&mut self) -> Option<ScrollReason> {
        loop {
            match self.rx.recv().await {
                Ok(reason) => return Some(reason),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "scroll-to-top subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_hears_a_trigger() {
        let hub = ScrollToTop::new();
        let mut first = hub.subscribe();
        let mut second = hub.clone().subscribe();

        assert_eq!(hub.trigger(ScrollReason::Requested), 2);
        assert_eq!(first.recv().await, Some(ScrollReason::Requested));
        assert_eq!(second.recv().await, Some(ScrollReason::Requested));
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let hub = ScrollToTop::new();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.trigger(ScrollReason::Refreshed), 0);
    }

    #[tokio::test]
    async fn subscription_ends_with_the_hub() {
        let hub = ScrollToTop::new();
        let mut sub = hub.subscribe();
        drop(hub);
        assert_eq!(sub.recv().await, None);
    }
}
