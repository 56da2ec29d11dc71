//! Single-producer / single-consumer event pipe.

use super::capacity_for;
use crate::event::{BridgeEvent, EventSink};
use crate::lockfree::AtomicCounter;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::Arc;

/// Default capacity for event pipes.
pub const DEFAULT_PIPE_CAPACITY: usize = 1024;

/// Write end. Owned by exactly one thread.
pub struct PipeProducer<T> {
    producer: HeapProd<T>,
    dropped: Arc<AtomicCounter>,
}

impl<T> PipeProducer<T> {
    /// Push one item. Returns `false` (and counts a drop) when full.
    #[inline]
    pub fn push(&mut self, item: T) -> bool {
        if self.producer.try_push(item).is_ok() {
            true
        } else {
            self.dropped.increment();
            false
        }
    }

    #[inline]
    pub fn vacant_len(&self) -> usize {
        self.producer.vacant_len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }
}

impl<T: Copy> PipeProducer<T> {
    /// Push as many items as fit; returns how many were written.
    #[inline]
    pub fn push_slice(&mut self, items: &[T]) -> usize {
        let written = self.producer.push_slice(items);
        for _ in written..items.len() {
            self.dropped.increment();
        }
        written
    }
}

impl EventSink for PipeProducer<BridgeEvent> {
    #[inline]
    fn emit(&mut self, event: BridgeEvent) -> bool {
        self.push(event)
    }
}

/// Read end. Owned by exactly one thread.
pub struct PipeConsumer<T> {
    consumer: HeapCons<T>,
    dropped: Arc<AtomicCounter>,
}

impl<T> PipeConsumer<T> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.consumer.try_pop()
    }

    /// Hand every pending item to `f` as at most two contiguous spans (the
    /// second span is non-empty only when the readable region wraps), then
    /// release them. Returns the number of items consumed.
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

    /// Discard everything pending.
    pub fn clear(&mut self) -> usize {
        self.consumer.clear()
    }

    /// Pushes the producer had to drop because the pipe was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }
}

impl<T: Copy> PipeConsumer<T> {
    /// Copy pending items into a caller-owned buffer (RT-safe).
    #[inline]
    pub fn pop_into(&mut self, buffer: &mut [T]) -> usize {
        self.consumer.pop_slice(buffer)
    }
}

/// Create a pipe holding at least `capacity` items (rounded up to a power of two).
pub fn event_pipe<T>(capacity: usize) -> (PipeProducer<T>, PipeConsumer<T>) {
    let rb = HeapRb::new(capacity_for(capacity));
    let (producer, consumer) = rb.split();
    let dropped = Arc::new(AtomicCounter::new());
    (
        PipeProducer {
            producer,
            dropped: Arc::clone(&dropped),
        },
        PipeConsumer { consumer, dropped },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSource;
    use proptest::prelude::*;

    fn note(n: u8) -> BridgeEvent {
        BridgeEvent::note_on(EventSource::Sequencer, 1, n, 1.0)
    }

    #[test]
    fn test_push_and_drain_preserves_order() {
        let (mut tx, mut rx) = event_pipe(8);
        for n in 0..5 {
            assert!(tx.push(note(n)));
        }

        let mut seen = Vec::new();
        let consumed = rx.drain_spans(|span| seen.extend_from_slice(span));
        assert_eq!(consumed, 5);
        assert_eq!(
            seen.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert!(rx.is_empty());
    }

    #[test]
    fn test_wrapped_region_drains_in_two_spans() {
        let (mut tx, mut rx) = event_pipe::<u32>(8);
        for i in 0..6 {
            tx.push(i);
        }
        for _ in 0..6 {
            rx.pop();
        }
        // Write index now sits near the end; these wrap.
        for i in 10..16 {
            tx.push(i);
        }

        let mut spans = Vec::new();
        rx.drain_spans(|span| spans.push(span.to_vec()));
        assert_eq!(spans.len(), 2);
        assert_eq!(spans.concat(), vec![10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_full_pipe_counts_drops() {
        let (mut tx, rx) = event_pipe::<u8>(4);
        assert_eq!(tx.push_slice(&[1, 2, 3, 4, 5, 6]), 4);
        assert!(!tx.push(7));
        assert_eq!(rx.dropped_count(), 3);
    }

    #[test]
    fn test_pop_into_buffer() {
        let (mut tx, mut rx) = event_pipe(16);
        tx.push(note(60));
        tx.push(note(64));
        let mut buffer = [BridgeEvent::default(); 8];
        assert_eq!(rx.pop_into(&mut buffer), 2);
        assert_eq!(buffer[1].index, 64);
    }

    proptest! {
        #[test]
        fn capacity_law(exp in 1u32..10, pops in 1usize..8) {
            let capacity = 1usize << exp;
            let (mut tx, mut rx) = event_pipe::<usize>(capacity);
            prop_assert_eq!(tx.capacity(), capacity);

            for i in 0..capacity {
                prop_assert!(tx.push(i));
            }
            prop_assert!(!tx.push(capacity));

            let pops = pops.min(capacity);
            for _ in 0..pops {
                prop_assert!(rx.pop().is_some());
                prop_assert!(tx.push(0));
                prop_assert!(!tx.push(0));
            }
        }
    }
}
