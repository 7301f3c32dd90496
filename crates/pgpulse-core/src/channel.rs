//! Fan-out of published snapshots to registered observers.
//!
//! Every observer gets its own unbounded queue, so a slow observer never
//! loses snapshots and never holds up the poller. There is no replay: a new
//! subscription only sees snapshots published after it was created. The last
//! snapshot is available separately through the poller's pull path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use crate::snapshot::MetricsSnapshot;

type Observers = HashMap<u64, mpsc::UnboundedSender<Arc<MetricsSnapshot>>>;
type Registry = Mutex<Observers>;

fn lock(registry: &Registry) -> MutexGuard<'_, Observers> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct SnapshotChannel {
    observers: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl SnapshotChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new observer.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.observers).insert(id, tx);
        debug!(observer = id, "observer subscribed");
        Subscription {
            rx,
            disposer: Disposer {
                id,
                observers: Arc::downgrade(&self.observers),
                disposed: Arc::new(AtomicBool::new(false)),
            },
        }
    }

    /// Delivers `snapshot` to every registered observer and returns how many
    /// received it. Observers whose receiving side is gone are pruned.
    pub fn publish(&self, snapshot: Arc<MetricsSnapshot>) -> usize {
        let mut observers = lock(&self.observers);
        let mut delivered = 0;
        observers.retain(|id, tx| match tx.send(snapshot.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!(observer = *id, "pruning closed observer");
                false
            }
        });
        delivered
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }
}

/// Cancels delivery to one observer. Cloneable; disposing more than once is
/// a no-op.
#[derive(Clone)]
pub struct Disposer {
    id: u64,
    observers: Weak<Registry>,
    disposed: Arc<AtomicBool>,
}

impl Disposer {
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(observers) = self.observers.upgrade() {
            lock(&observers).remove(&self.id);
            debug!(observer = self.id, "observer disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Receiving side of one observer. Dropping it disposes the observer.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Arc<MetricsSnapshot>>,
    disposer: Disposer,
}

impl Subscription {
    /// Waits for the next snapshot. Returns `None` once disposed and drained.
    pub async fn recv(&mut self) -> Option<Arc<MetricsSnapshot>> {
        self.rx.recv().await
    }

    /// Returns a queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<MetricsSnapshot>> {
        self.rx.try_recv().ok()
    }

    pub fn disposer(&self) -> Disposer {
        self.disposer.clone()
    }

    pub fn dispose(&self) {
        self.disposer.dispose();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.disposer.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(msg: &str) -> Arc<MetricsSnapshot> {
        Arc::new(MetricsSnapshot::error(Utc::now(), msg))
    }

    #[test]
    fn every_observer_gets_every_snapshot_in_order() {
        let channel = SnapshotChannel::new();
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        for i in 0..50 {
            assert_eq!(channel.publish(snap(&format!("s{i}"))), 2);
        }

        for sub in [&mut a, &mut b] {
            for i in 0..50 {
                let got = sub.try_recv().unwrap();
                assert_eq!(got.error_message(), Some(format!("s{i}").as_str()));
            }
            assert!(sub.try_recv().is_none());
        }
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let channel = SnapshotChannel::new();
        channel.publish(snap("before"));
        let mut late = channel.subscribe();
        assert!(late.try_recv().is_none());
        channel.publish(snap("after"));
        assert_eq!(late.try_recv().unwrap().error_message(), Some("after"));
    }

    #[test]
    fn disposed_observer_receives_nothing_more() {
        let channel = SnapshotChannel::new();
        let mut sub = channel.subscribe();
        let mut other = channel.subscribe();
        channel.publish(snap("one"));

        let disposer = sub.disposer();
        disposer.dispose();
        disposer.dispose();
        sub.dispose();
        assert!(disposer.is_disposed());

        assert_eq!(channel.publish(snap("two")), 1);
        assert_eq!(sub.try_recv().unwrap().error_message(), Some("one"));
        assert!(sub.try_recv().is_none());
        assert_eq!(other.try_recv().unwrap().error_message(), Some("one"));
        assert_eq!(other.try_recv().unwrap().error_message(), Some("two"));
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let channel = SnapshotChannel::new();
        let sub = channel.subscribe();
        let disposer = sub.disposer();
        assert_eq!(channel.observer_count(), 1);
        drop(sub);
        assert_eq!(channel.observer_count(), 0);
        disposer.dispose();
    }

    #[test]
    fn disposer_outliving_channel_is_harmless() {
        let channel = SnapshotChannel::new();
        let sub = channel.subscribe();
        let disposer = sub.disposer();
        drop(channel);
        disposer.dispose();
        drop(sub);
    }

    #[tokio::test]
    async fn recv_ends_after_dispose() {
        let channel = SnapshotChannel::new();
        let mut sub = channel.subscribe();
        channel.publish(snap("last"));
        sub.dispose();
        assert_eq!(sub.recv().await.unwrap().error_message(), Some("last"));
        assert!(sub.recv().await.is_none());
    }
}
