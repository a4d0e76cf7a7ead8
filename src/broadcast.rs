// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Pub/sub fan-out of new exchange records to live inspector subscribers.

use crate::exchange::ExchangeRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Fan-out hub. Publishing never blocks the request path: each subscriber
/// has a bounded channel and a full channel drops the event for that
/// subscriber only, counted per subscriber.
pub struct Broadcaster {
    subscribers: Mutex<HashMap<Uuid, SubscriberHandle>>,
    channel_capacity: usize,
}

struct SubscriberHandle {
    tx: mpsc::Sender<Arc<ExchangeRecord>>,
    dropped: Arc<AtomicU64>,
}

/// A live subscription. `recv` suspends until the next record arrives or
/// the subscription ends; it never busy-polls.
pub struct Subscriber {
    id: Uuid,
    rx: mpsc::Receiver<Arc<ExchangeRecord>>,
    dropped: Arc<AtomicU64>,
}

impl Subscriber {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receive the next published record. Returns `None` once the
    /// subscription has been removed or the broadcaster shut down.
    pub async fn recv(&mut self) -> Option<Arc<ExchangeRecord>> {
        self.rx.recv().await
    }

    /// Events dropped for this subscriber because its channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Surrender the underlying channel, e.g. to adapt it into a stream.
    pub fn into_receiver(self) -> mpsc::Receiver<Arc<ExchangeRecord>> {
        self.rx
    }
}

impl Broadcaster {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register a new subscriber. History is not delivered retroactively;
    /// callers seed backlog from a capture-store snapshot instead.
    pub fn subscribe(&self) -> Subscriber {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = Uuid::new_v4();
        self.lock().insert(
            id,
            SubscriberHandle {
                tx,
                dropped: dropped.clone(),
            },
        );
        tracing::debug!(%id, "inspector subscribed");
        Subscriber { id, rx, dropped }
    }

    /// Remove a subscriber, dropping its sender so the receiver observes a
    /// clean end-of-stream.
    pub fn unsubscribe(&self, id: Uuid) {
        if self.lock().remove(&id).is_some() {
            tracing::debug!(%id, "inspector unsubscribed");
        }
    }

    /// Enqueue a record to every subscriber without waiting for any of them.
    ///
    /// Slow consumers lose this event and their drop counter is bumped;
    /// subscribers whose receiver is gone are pruned.
    pub fn publish(&self, record: Arc<ExchangeRecord>) {
        let mut subscribers = self.lock();
        let mut dead = Vec::new();
        for (id, handle) in subscribers.iter() {
            match handle.tx.try_send(record.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    handle.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(subscriber = %id, record = record.id, "slow consumer, event dropped");
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            subscribers.remove(&id);
            tracing::debug!(%id, "pruned disconnected subscriber");
        }
    }

    /// Drop every sender so all subscriber streams end deterministically.
    pub fn close_all(&self) {
        self.lock().clear();
    }

    /// Dropped-event count for a subscriber still registered with the hub.
    pub fn dropped(&self, id: Uuid) -> u64 {
        self.lock()
            .get(&id)
            .map(|h| h.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SubscriberHandle>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("broadcaster lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
