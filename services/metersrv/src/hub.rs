//! Fan-out of readings and status events to independent consumers
//!
//! Each subscriber owns a small bounded queue. Publishing never waits: a full
//! queue simply misses that item, so a slow consumer sees gaps instead of
//! stalling the acquisition worker.

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Per-subscriber queue depth
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

/// Receiving side of a subscription
///
/// `recv` yields `None` once the subscriber has been removed (unsubscribe,
/// overwrite by a duplicate id, or hub teardown).
#[derive(Debug)]
pub struct Subscription<T> {
    id: String,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking poll, for draining in tests and tight loops
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Registry of subscriber queues keyed by id
#[derive(Debug)]
pub struct SubscriptionHub<T> {
    name: &'static str,
    capacity: usize,
    subscribers: RwLock<HashMap<String, mpsc::Sender<T>>>,
}

impl<T: Clone> SubscriptionHub<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, SUBSCRIBER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a queue under `id`, replacing any previous one
    pub fn subscribe(&self, id: impl Into<String>) -> Subscription<T> {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.subscribers.write().insert(id.clone(), tx).is_some() {
            debug!("{} hub: subscriber {} replaced", self.name, id);
        } else {
            debug!("{} hub: subscriber {} added", self.name, id);
        }
        Subscription { id, rx }
    }

    /// Remove and close the queue; unknown ids are ignored
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.subscribers.write().remove(id).is_some();
        if removed {
            debug!("{} hub: subscriber {} removed", self.name, id);
        }
        removed
    }

    /// Offer `item` to every subscriber without waiting
    ///
    /// Returns how many queues accepted it. Subscribers whose receiver was
    /// dropped are pruned.
    pub fn broadcast(&self, item: &T) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, tx) in subscribers.iter() {
                match tx.try_send(item.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        trace!("{} hub: queue full for {}, dropped", self.name, id);
                    },
                    Err(TrySendError::Closed(_)) => closed.push(id.clone()),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                // Only prune if the entry was not replaced in the meantime
                if subscribers.get(&id).is_some_and(|tx| tx.is_closed()) {
                    subscribers.remove(&id);
                }
            }
        }

        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Teardown: close every queue
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }
}
