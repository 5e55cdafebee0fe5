//! Subscription handles and the per-controller handle table
//!
//! Every live feed (registry watch, BLE observation, RSSI timer, bus listener)
//! hands back a [`Subscription`]. Feeds deliver values through a [`Sink`],
//! which stamps them with the [`SubscriptionId`] they were issued under and
//! posts them onto the owning controller's inbox. The controller checks the id
//! against its [`HandleTable`] before applying anything, so a value that was
//! already in flight when its handle was released is dropped.

use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cancels its feed exactly once, on `cancel()` or on drop
#[must_use = "dropping a subscription cancels it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release (one-shot feeds that already completed)
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    /// Ties a spawned task to the subscription; releasing aborts the task
    pub fn from_task(handle: tokio::task::JoinHandle<()>) -> Self {
        Subscription::new(move || handle.abort())
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

/// Delivery end handed to a feed
pub struct Sink<T> {
    id: SubscriptionId,
    deliver: Arc<dyn Fn(SubscriptionId, T) + Send + Sync>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Sink {
            id: self.id,
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<T> Sink<T> {
    pub fn new(
        id: SubscriptionId,
        deliver: impl Fn(SubscriptionId, T) + Send + Sync + 'static,
    ) -> Self {
        Sink {
            id,
            deliver: Arc::new(deliver),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn send(&self, value: T) {
        (self.deliver)(self.id, value)
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").field("id", &self.id).finish()
    }
}

/// A value delivered by a feed, waiting on the controller's queue
#[derive(Debug)]
pub struct Envelope<M> {
    pub id: SubscriptionId,
    pub message: M,
}

struct Entry<K> {
    key: K,
    subscription: Option<Subscription>,
}

/// Arena of live subscriptions owned by one controller
///
/// `K` names what a handle is for (e.g. "heartbeat of tag X"), `M` is the
/// controller's message type.
pub struct HandleTable<K, M> {
    next: u64,
    entries: HashMap<SubscriptionId, Entry<K>>,
    tx: mpsc::UnboundedSender<Envelope<M>>,
}

impl<K, M> HandleTable<K, M>
where
    K: fmt::Debug,
    M: Send + 'static,
{
    /// Creates the table together with the receiving end of its queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let table = HandleTable {
            next: 1,
            entries: HashMap::new(),
            tx,
        };
        (table, rx)
    }

    /// Issues a new id, builds a sink for it and lets `start` open the feed
    pub fn subscribe<T: 'static>(
        &mut self,
        key: K,
        wrap: impl Fn(T) -> M + Send + Sync + 'static,
        start: impl FnOnce(Sink<T>) -> Subscription,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next);
        self.next += 1;
        self.entries.insert(
            id,
            Entry {
                key,
                subscription: None,
            },
        );

        let tx = self.tx.clone();
        let sink = Sink::new(id, move |id, value| {
            // The queue only closes once the controller is gone
            let _ = tx.send(Envelope {
                id,
                message: wrap(value),
            });
        });

        let subscription = start(sink);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.subscription = Some(subscription);
        }
        id
    }

    /// Returns the purpose of a live handle, `None` for released or unknown ids
    pub fn accept(&self, id: SubscriptionId) -> Option<&K> {
        match self.entries.get(&id) {
            Some(entry) => Some(&entry.key),
            None => {
                debug!("Dropping late delivery for released subscription {}", id);
                None
            }
        }
    }

    pub fn release(&mut self, id: SubscriptionId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                if let Some(subscription) = entry.subscription {
                    subscription.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Releases every handle whose key matches; returns how many were released
    pub fn release_where(&mut self, predicate: impl Fn(&K) -> bool) -> usize {
        let ids: Vec<SubscriptionId> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(&entry.key))
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter(|id| self.release(**id)).count()
    }

    pub fn release_all(&mut self) -> usize {
        self.release_where(|_| true)
    }

    pub fn count_where(&self, predicate: impl Fn(&K) -> bool) -> usize {
        self.entries.values().filter(|entry| predicate(&entry.key)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_subscription(counter: &Arc<AtomicUsize>) -> Subscription {
        let counter = Arc::clone(counter);
        Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn subscription_cancels_once() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        counting_subscription(&cancelled).cancel();
        drop(counting_subscription(&cancelled));
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn released_handles_reject_late_deliveries() {
        let (mut table, mut rx) = HandleTable::<&'static str, i32>::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let mut sink = None;

        let id = table.subscribe("feed", |v: i32| v * 10, |s| {
            sink = Some(s);
            counting_subscription(&cancelled)
        });
        let sink = sink.expect("sink handed to feed");

        sink.send(1);
        let envelope = rx.try_recv().expect("delivered");
        assert_eq!(envelope.message, 10);
        assert_eq!(table.accept(envelope.id), Some(&"feed"));

        assert!(table.release(id));
        sink.send(2);
        let late = rx.try_recv().expect("still queued");
        assert_eq!(table.accept(late.id), None);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_all_is_idempotent() {
        let (mut table, _rx) = HandleTable::<u8, ()>::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        for key in 0..3u8 {
            table.subscribe(key, |_: ()| (), |_| counting_subscription(&cancelled));
        }

        assert_eq!(table.release_where(|k| *k == 1), 1);
        assert_eq!(table.release_all(), 2);
        assert_eq!(table.release_all(), 0);
        assert!(table.is_empty());
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    }
}
