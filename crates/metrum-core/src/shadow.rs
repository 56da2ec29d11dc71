//! Per-channel note and control shadow state.
//!
//! The audio thread records every event it emits; the UI polls without
//! locking or allocating. Notes are a 128-bit mask per channel, controls a
//! fixed array of 7-bit values.

use crate::event::{
    BridgeEvent, EventKind, EventSink, MAX_CHANNEL, MAX_INDEX, MIN_CHANNEL, NUM_CHANNELS,
};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

#[repr(align(64))]
struct ChannelState {
    notes: [AtomicU64; 2],
    controls: [AtomicU8; 128],
}

impl ChannelState {
    fn new() -> Self {
        Self {
            notes: [AtomicU64::new(0), AtomicU64::new(0)],
            controls: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }
}

pub struct ChannelShadow {
    channels: [ChannelState; NUM_CHANNELS],
}

impl ChannelShadow {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| ChannelState::new()),
        }
    }

    /// Record an emitted event (audio thread).
    #[inline]
    pub fn apply(&self, event: &BridgeEvent) {
        let channel = &self.channels[event.channel_index()];
        let note = event.index.min(MAX_INDEX) as usize;
        let (word, bit) = (note / 64, 1u64 << (note % 64));

        match event.kind {
            EventKind::NoteOn if event.value > 0.0 => {
                channel.notes[word].fetch_or(bit, Ordering::Relaxed);
            }
            EventKind::NoteOn | EventKind::NoteOff => {
                channel.notes[word].fetch_and(!bit, Ordering::Relaxed);
            }
            EventKind::ControlChange => {
                let value = (event.value.clamp(0.0, 1.0) * 127.0).round() as u8;
                channel.controls[note].store(value, Ordering::Relaxed);
            }
            EventKind::AllNotesOff => {
                channel.notes[0].store(0, Ordering::Relaxed);
                channel.notes[1].store(0, Ordering::Relaxed);
            }
            EventKind::PositionJump => {}
        }
    }

    /// Bit `n` set means note `n` is sounding. `channel` is 1..=16.
    pub fn active_notes(&self, channel: u8) -> u128 {
        let Some(state) = self.channel(channel) else {
            return 0;
        };
        let lo = state.notes[0].load(Ordering::Relaxed) as u128;
        let hi = state.notes[1].load(Ordering::Relaxed) as u128;
        (hi << 64) | lo
    }

    pub fn is_note_active(&self, channel: u8, note: u8) -> bool {
        note < 128 && self.active_notes(channel) & (1u128 << note) != 0
    }

    pub fn active_note_count(&self, channel: u8) -> u32 {
        self.active_notes(channel).count_ones()
    }

    /// Last control value, 0..=127.
    pub fn control_value(&self, channel: u8, control: u8) -> u8 {
        self.channel(channel)
            .and_then(|state| state.controls.get(control as usize))
            .map_or(0, |value| value.load(Ordering::Relaxed))
    }

    /// Forget all sounding notes. Control values are kept.
    pub fn clear_notes(&self) {
        for state in &self.channels {
            state.notes[0].store(0, Ordering::Relaxed);
            state.notes[1].store(0, Ordering::Relaxed);
        }
    }

    fn channel(&self, channel: u8) -> Option<&ChannelState> {
        if (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            Some(&self.channels[(channel - MIN_CHANNEL) as usize])
        } else {
            None
        }
    }
}

impl Default for ChannelShadow {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards to `inner` and records what was actually delivered.
pub struct ShadowSink<'a, S: EventSink + ?Sized> {
    inner: &'a mut S,
    shadow: &'a ChannelShadow,
}

impl<'a, S: EventSink + ?Sized> ShadowSink<'a, S> {
    pub fn new(inner: &'a mut S, shadow: &'a ChannelShadow) -> Self {
        Self { inner, shadow }
    }
}

impl<S: EventSink + ?Sized> EventSink for ShadowSink<'_, S> {
    #[inline]
    fn emit(&mut self, event: BridgeEvent) -> bool {
        // Note-offs update the shadow even when the queue is full, so the
        // UI never shows a note stuck on because of backpressure.
        let delivered = self.inner.emit(event);
        if delivered || event.is_note_off() || event.kind == EventKind::AllNotesOff {
            self.shadow.apply(&event);
        }
        delivered
    }
}
