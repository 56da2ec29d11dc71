//! Deferred event scheduler.
//!
//! Producers never touch the slot pool. They push [`CommandItem`]s into an
//! SPSC pipe through a [`SchedulerHandle`]; the audio thread drains the pipe
//! into a fixed pool of slots and fires whatever falls due inside the block
//! it is rendering.
//!
//! Within one block, due events fire in target-beat order with ties broken
//! by slot index. There is no ordering guarantee across producers beyond
//! that.

use crate::error::{Error, Result};
use metrum_core::event::{BridgeEvent, EventKind, EventSink, EventSource, MIN_CHANNEL};
use metrum_core::ring::{event_pipe, PipeConsumer, PipeProducer};
use metrum_core::AtomicCounter;
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_POOL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandItem {
    Schedule { event: BridgeEvent, beat: f64 },
    /// Drop everything pending without emitting.
    Clear,
    /// Emit pending note-offs and an all-notes-off per touched channel, then
    /// drop everything pending.
    AllNotesOff,
}

/// Producer side. Owned by one non-audio thread.
pub struct SchedulerHandle {
    commands: PipeProducer<CommandItem>,
    exhausted: Arc<AtomicCounter>,
    rejected: u64,
}

impl SchedulerHandle {
    /// Fire `event` when the transport reaches `beat`. Returns `false` if the
    /// command queue is full; the caller may retry or drop.
    ///
    /// Records with an out-of-range channel or index and non-finite beats
    /// never reach the audio thread: they are counted and `false` is
    /// returned.
    #[inline]
    pub fn schedule_event(&mut self, event: BridgeEvent, beat: f64) -> bool {
        if !event.is_valid() || !beat.is_finite() {
            self.rejected += 1;
            warn!(?event, beat, "rejected scheduled event");
            return false;
        }
        self.commands.push(CommandItem::Schedule { event, beat })
    }

    #[inline]
    pub fn clear(&mut self) -> bool {
        self.commands.push(CommandItem::Clear)
    }

    #[inline]
    pub fn all_notes_off(&mut self) -> bool {
        self.commands.push(CommandItem::AllNotesOff)
    }

    /// Commands lost to a full queue.
    pub fn dropped_count(&self) -> u64 {
        self.commands.dropped_count()
    }

    /// Schedule requests lost to a full slot pool.
    pub fn pool_exhausted_count(&self) -> u64 {
        self.exhausted.get()
    }

    /// Malformed schedule requests refused by [`SchedulerHandle::schedule_event`].
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}

#[derive(Clone, Copy, Default)]
struct Slot {
    event: BridgeEvent,
    beat: f64,
    active: bool,
}

/// Audio-thread side.
pub struct DeferredScheduler {
    commands: PipeConsumer<CommandItem>,
    slots: Box<[Slot]>,
    free: Vec<u16>,
    due: Vec<u16>,
    active: usize,
    cursor: f64,
    /// Bit `n` set: channel `n + 1` has had notes scheduled since the last
    /// all-notes-off.
    touched_channels: u16,
    exhausted: Arc<AtomicCounter>,
}

impl DeferredScheduler {
    pub fn new(pool_size: usize, command_capacity: usize) -> Result<(Self, SchedulerHandle)> {
        if pool_size == 0 || pool_size > u16::MAX as usize {
            return Err(Error::InvalidPoolSize(pool_size));
        }

        let (producer, consumer) = event_pipe(command_capacity);
        let exhausted = Arc::new(AtomicCounter::new());
        // Popped from the back, so slot 0 is claimed first.
        let free: Vec<u16> = (0..pool_size as u16).rev().collect();

        let scheduler = Self {
            commands: consumer,
            slots: vec![Slot::default(); pool_size].into_boxed_slice(),
            free,
            due: Vec::with_capacity(pool_size),
            active: 0,
            cursor: 0.0,
            touched_channels: 0,
            exhausted: Arc::clone(&exhausted),
        };
        let handle = SchedulerHandle {
            commands: producer,
            exhausted,
            rejected: 0,
        };
        Ok((scheduler, handle))
    }

    /// Render one audio block starting at the internal cursor.
    pub fn process_block(
        &mut self,
        sink: &mut impl EventSink,
        num_samples: usize,
        tempo: f64,
        sample_rate: f64,
    ) -> usize {
        if sample_rate <= 0.0 {
            return 0;
        }
        let span = num_samples as f64 / sample_rate * tempo / 60.0;
        let start = self.cursor;
        self.process_span(sink, start, start + span)
    }

    /// Drain commands, then fire everything due before `end`. The cursor
    /// ends at `end`. Returns the number of events fired.
    pub fn process_span(&mut self, sink: &mut impl EventSink, start: f64, end: f64) -> usize {
        self.cursor = start;
        self.drain_commands(sink);
        let fired = self.fire_due(sink, end);
        self.cursor = end;
        fired
    }

    /// Apply pending commands without firing anything.
    pub fn drain_commands(&mut self, sink: &mut impl EventSink) {
        while let Some(command) = self.commands.pop() {
            match command {
                CommandItem::Schedule { event, beat } => {
                    self.schedule_local(event, beat);
                }
                CommandItem::Clear => self.clear_local(),
                CommandItem::AllNotesOff => self.all_notes_off_local(sink),
            }
        }
    }

    /// Fire active slots whose target is before `end`, in beat order.
    /// Overdue slots fire too.
    pub fn fire_due(&mut self, sink: &mut impl EventSink, end: f64) -> usize {
        if self.active == 0 {
            return 0;
        }

        self.due.clear();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.active && slot.beat < end {
                self.due.push(index as u16);
            }
        }

        let slots = &self.slots;
        self.due.sort_unstable_by(|&a, &b| {
            slots[a as usize]
                .beat
                .total_cmp(&slots[b as usize].beat)
                .then(a.cmp(&b))
        });

        for &index in &self.due {
            let slot = &mut self.slots[index as usize];
            slot.active = false;
            sink.emit(slot.event);
            self.free.push(index);
        }
        self.active -= self.due.len();
        self.due.len()
    }

    /// Schedule from the audio thread itself (sequencer note-offs, delayed
    /// note-ons). Returns `false` when the pool is exhausted.
    #[inline]
    pub fn schedule_local(&mut self, event: BridgeEvent, beat: f64) -> bool {
        let Some(index) = self.free.pop() else {
            self.exhausted.increment();
            return false;
        };
        self.slots[index as usize] = Slot {
            event,
            beat,
            active: true,
        };
        self.active += 1;
        self.touched_channels |= 1 << event.channel_index();
        true
    }

    /// `true` if `slots` more events fit. A miss counts as an exhaustion.
    #[inline]
    pub fn try_reserve(&self, slots: usize) -> bool {
        if self.free.len() >= slots {
            true
        } else {
            self.exhausted.increment();
            false
        }
    }

    pub fn clear_local(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.active {
                slot.active = false;
                self.free.push(index as u16);
            }
        }
        self.active = 0;
    }

    pub fn all_notes_off_local(&mut self, sink: &mut impl EventSink) {
        self.flush_note_offs(sink);
        self.clear_local();
        let mut channels = self.touched_channels;
        while channels != 0 {
            let bit = channels.trailing_zeros() as u8;
            sink.emit(BridgeEvent::all_notes_off(
                EventSource::Scheduler,
                bit + MIN_CHANNEL,
            ));
            channels &= channels - 1;
        }
        self.touched_channels = 0;
    }

    /// Emit every pending note-off now, in slot order, leaving other events
    /// scheduled. Used before a position jump so nothing is left hanging.
    pub fn flush_note_offs(&mut self, sink: &mut impl EventSink) -> usize {
        let mut flushed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.active && slot.event.kind == EventKind::NoteOff {
                slot.active = false;
                sink.emit(slot.event);
                self.free.push(index as u16);
                flushed += 1;
            }
        }
        self.active -= flushed;
        flushed
    }

    /// Move the cursor after a position jump.
    #[inline]
    pub fn sync_position(&mut self, beat: f64) {
        self.cursor = beat;
    }

    /// Shift events scheduled past a loop end back into the loop so they
    /// fire on the next pass.
    pub fn wrap(&mut self, loop_end: f64, loop_start: f64) {
        let length = loop_end - loop_start;
        for slot in self.slots.iter_mut().filter(|s| s.active && s.beat >= loop_end) {
            slot.beat -= length;
        }
        self.cursor = loop_start;
    }

    #[inline]
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn pool_exhausted_count(&self) -> u64 {
        self.exhausted.get()
    }
}
