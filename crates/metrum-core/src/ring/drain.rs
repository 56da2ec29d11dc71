//! Wake-on-write drain queue.
//!
//! Like [`super::pipe`], but the consumer parks its thread while the queue is
//! empty and every successful push unparks it. Delivery latency is bounded by
//! the OS wake-up rather than by a poll interval.

use super::capacity_for;
use crate::lockfree::AtomicCounter;
use crossbeam_utils::sync::{Parker, Unparker};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::time::Duration;

/// Write end.
pub struct DrainProducer<T> {
    producer: HeapProd<T>,
    unparker: Unparker,
    dropped: Arc<AtomicCounter>,
}

impl<T> DrainProducer<T> {
    /// Push and wake the consumer. Returns `false` when full.
    #[inline]
    pub fn push(&mut self, item: T) -> bool {
        if self.producer.try_push(item).is_err() {
            self.dropped.increment();
            return false;
        }
        self.unparker.unpark();
        true
    }

    /// Wake the consumer without pushing (used on shutdown).
    pub fn wake(&self) {
        self.unparker.unpark();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }
}

/// Read end. Must live on the thread that waits on it.
pub struct DrainConsumer<T> {
    consumer: HeapCons<T>,
    parker: Parker,
    dropped: Arc<AtomicCounter>,
}

impl<T> DrainConsumer<T> {
    /// Sleep until data arrives, a wake is signalled, or `timeout` elapses.
    /// Returns `true` if data is pending afterwards.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.consumer.is_empty() {
            self.parker.park_timeout(timeout);
        }
        !self.consumer.is_empty()
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.consumer.try_pop()
    }

    /// Two-span drain, see [`super::PipeConsumer::drain_spans`].
    pub fn drain_spans(&mut self, mut f: impl FnMut(&[T])) -> usize {
        let count = {
            let (head, tail) = self.consumer.as_slices();
            if !head.is_empty() {
                f(head);
            }
            if !tail.is_empty() {
                f(tail);
            }
            head.len() + tail.len()
        };
        self.consumer.skip(count)
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }
}

/// Create a wake-on-write queue of at least `capacity` items.
pub fn drain_queue<T>(capacity: usize) -> (DrainProducer<T>, DrainConsumer<T>) {
    let rb = HeapRb::new(capacity_for(capacity));
    let (producer, consumer) = rb.split();
    let parker = Parker::new();
    let unparker = parker.unparker().clone();
    let dropped = Arc::new(AtomicCounter::new());
    (
        DrainProducer {
            producer,
            unparker,
            dropped: Arc::clone(&dropped),
        },
        DrainConsumer {
            consumer,
            parker,
            dropped,
        },
    )
}
