//! Lossy multi-producer buffer.
//!
//! Producers on different threads (audio, network) serialize through a
//! spin-guarded reservation flag. A producer that cannot take the flag within
//! a bounded backoff, or finds the ring full, drops its item.

use super::capacity_for;
use crate::event::{BridgeEvent, EventSink};
use crate::lockfree::AtomicCounter;
use crossbeam_utils::Backoff;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Shared<T> {
    reserved: AtomicBool,
    producer: UnsafeCell<HeapProd<T>>,
    dropped: AtomicCounter,
}

// SAFETY: `producer` is only touched while `reserved` is held, which admits
// one thread at a time.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn try_reserve(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            if self
                .reserved
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            if backoff.is_completed() {
                return false;
            }
            backoff.spin();
        }
    }

    #[inline]
    fn release(&self) {
        self.reserved.store(false, Ordering::Release);
    }
}

/// Cloneable write end. Every clone may push from its own thread.
pub struct BroadcastSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BroadcastSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BroadcastSender<T> {
    /// Push one item. Never blocks beyond a bounded spin; returns `false` if
    /// the item was dropped.
    #[inline]
    pub fn push(&self, item: T) -> bool {
        if !self.shared.try_reserve() {
            self.shared.dropped.increment();
            return false;
        }
        // SAFETY: reservation held.
        let pushed = unsafe { (*self.shared.producer.get()).try_push(item).is_ok() };
        self.shared.release();
        if !pushed {
            self.shared.dropped.increment();
        }
        pushed
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.get()
    }
}

impl EventSink for BroadcastSender<BridgeEvent> {
    #[inline]
    fn emit(&mut self, event: BridgeEvent) -> bool {
        self.push(event)
    }
}

/// Single read end.
pub struct BroadcastReceiver<T> {
    consumer: HeapCons<T>,
    shared: Arc<Shared<T>>,
}

impl<T> BroadcastReceiver<T> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.consumer.try_pop()
    }

    /// Same two-span drain as [`super::PipeConsumer::drain_spans`].
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

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.get()
    }

    pub fn sender(&self) -> BroadcastSender<T> {
        BroadcastSender {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Create a lossy multi-producer buffer of at least `capacity` items.
pub fn broadcast_buffer<T>(capacity: usize) -> (BroadcastSender<T>, BroadcastReceiver<T>) {
    let rb = HeapRb::new(capacity_for(capacity));
    let (producer, consumer) = rb.split();
    let shared = Arc::new(Shared {
        reserved: AtomicBool::new(false),
        producer: UnsafeCell::new(producer),
        dropped: AtomicCounter::new(),
    });
    (
        BroadcastSender {
            shared: Arc::clone(&shared),
        },
        BroadcastReceiver { consumer, shared },
    )
}
