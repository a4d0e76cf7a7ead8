// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Bounded, ordered in-memory history of exchange records.

use crate::exchange::{ExchangeBuilder, ExchangeRecord};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe FIFO store of the most recent exchanges.
///
/// Capacity is fixed at construction; appending beyond it evicts the oldest
/// record. Sequence ids are assigned under the same lock as insertion, so
/// ids are unique, strictly increasing, and match store order.
pub struct CaptureStore {
    inner: Mutex<Inner>,
    capacity: usize,
    max_body_bytes: usize,
}

struct Inner {
    records: VecDeque<Arc<ExchangeRecord>>,
    next_id: u64,
}

impl CaptureStore {
    pub fn new(capacity: usize, max_body_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: VecDeque::with_capacity(capacity),
                next_id: 0,
            }),
            capacity,
            max_body_bytes,
        }
    }

    /// Append a finished exchange, assigning the next sequence id and
    /// evicting the oldest record when the store is full.
    ///
    /// Infallible from the caller's perspective: capture is best-effort
    /// observability and must never fail a forwarded request.
    pub fn append(&self, builder: ExchangeBuilder) -> Arc<ExchangeRecord> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let record = Arc::new(builder.build(inner.next_id, self.max_body_bytes));
        inner.records.push_back(record.clone());
        if inner.records.len() > self.capacity {
            inner.records.pop_front();
        }
        record
    }

    /// Consistent point-in-time copy of the stored records, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<ExchangeRecord>> {
        self.lock().records.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("capture store lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
