//! Shared transport record.
//!
//! Every field is an independent atomic. Readers get no cross-field
//! consistency: a UI poll may see a new tempo together with an old tick
//! position. Call sites must tolerate that.

use super::time_signature::TimeSignature;
use crate::lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

pub const DEFAULT_TICKS_PER_QUARTER: u32 = 960;

/// Authoritative musical-position record.
pub struct TransportState {
    is_playing: AtomicFlag,
    is_paused: AtomicFlag,
    paused_position_ticks: AtomicU64,
    ticks_per_quarter: AtomicU32,
    global_transpose: AtomicI32,
    time_sig_numerator: AtomicU32,
    time_sig_denominator: AtomicU32,
    /// Tempo actually driving position this block (internal, external or peer).
    tempo: AtomicFloat,
}

impl TransportState {
    pub fn new(ticks_per_quarter: u32, tempo: f32, time_signature: TimeSignature) -> Self {
        Self {
            is_playing: AtomicFlag::new(false),
            is_paused: AtomicFlag::new(false),
            paused_position_ticks: AtomicU64::new(0),
            ticks_per_quarter: AtomicU32::new(ticks_per_quarter.max(1)),
            global_transpose: AtomicI32::new(0),
            time_sig_numerator: AtomicU32::new(time_signature.numerator),
            time_sig_denominator: AtomicU32::new(time_signature.denominator),
            tempo: AtomicFloat::new(tempo),
        }
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.is_playing.get()
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.is_paused.get()
    }

    #[inline]
    pub fn paused_position_ticks(&self) -> u64 {
        self.paused_position_ticks.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ticks_per_quarter(&self) -> u32 {
        self.ticks_per_quarter.load(Ordering::Acquire)
    }

    #[inline]
    pub fn global_transpose(&self) -> i32 {
        self.global_transpose.load(Ordering::Acquire)
    }

    #[inline]
    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature::new(
            self.time_sig_numerator.load(Ordering::Acquire),
            self.time_sig_denominator.load(Ordering::Acquire),
        )
    }

    #[inline]
    pub fn tempo(&self) -> f32 {
        self.tempo.get()
    }

    pub fn set_global_transpose(&self, semitones: i32) {
        self.global_transpose
            .store(semitones.clamp(-127, 127), Ordering::Release);
    }

    /// Caller validates first; see [`TimeSignature::validate`].
    pub fn set_time_signature(&self, sig: TimeSignature) {
        self.time_sig_numerator
            .store(sig.numerator, Ordering::Release);
        self.time_sig_denominator
            .store(sig.denominator, Ordering::Release);
    }

    pub fn set_ticks_per_quarter(&self, ticks: u32) {
        self.ticks_per_quarter.store(ticks.max(1), Ordering::Release);
    }

    pub fn set_tempo(&self, bpm: f32) {
        self.tempo.set(bpm);
    }

    pub fn set_playing(&self) {
        self.is_paused.set(false);
        self.is_playing.set(true);
    }

    pub fn set_paused(&self, position_ticks: u64) {
        self.paused_position_ticks
            .store(position_ticks, Ordering::Release);
        self.is_playing.set(false);
        self.is_paused.set(true);
    }

    /// Reset to the stopped state. The record itself is never destroyed.
    pub fn set_stopped(&self) {
        self.is_playing.set(false);
        self.is_paused.set(false);
        self.paused_position_ticks.store(0, Ordering::Release);
    }
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new(DEFAULT_TICKS_PER_QUARTER, 120.0, TimeSignature::default())
    }
}

/// Values written on every audio callback and read by the UI at low rate.
///
/// Kept on its own cache line away from [`TransportState`].
#[repr(align(64))]
pub struct HotCounters {
    current_tick: AtomicU64,
    current_beat: AtomicDouble,
    /// Active roll cycle in ticks; zero when no roll is engaged.
    roll_interval_ticks: AtomicU32,
    roll_start_tick: AtomicU64,
}

impl HotCounters {
    pub fn new() -> Self {
        Self {
            current_tick: AtomicU64::new(0),
            current_beat: AtomicDouble::new(0.0),
            roll_interval_ticks: AtomicU32::new(0),
            roll_start_tick: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn current_beat(&self) -> f64 {
        self.current_beat.get()
    }

    #[inline]
    pub fn roll_interval_ticks(&self) -> u32 {
        self.roll_interval_ticks.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn roll_start_tick(&self) -> u64 {
        self.roll_start_tick.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn publish_position(&self, beat: f64, ticks_per_quarter: u32) {
        self.current_beat.set(beat);
        self.current_tick.store(
            (beat.max(0.0) * ticks_per_quarter as f64) as u64,
            Ordering::Relaxed,
        );
    }

    #[inline]
    pub fn publish_roll(&self, interval_ticks: u32, start_tick: u64) {
        self.roll_interval_ticks
            .store(interval_ticks, Ordering::Relaxed);
        self.roll_start_tick.store(start_tick, Ordering::Relaxed);
    }
}

impl Default for HotCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = TransportState::default();
        assert!(!state.is_playing());

        state.set_playing();
        assert!(state.is_playing() && !state.is_paused());

        state.set_paused(1920);
        assert!(!state.is_playing() && state.is_paused());
        assert_eq!(state.paused_position_ticks(), 1920);

        state.set_stopped();
        assert!(!state.is_paused());
        assert_eq!(state.paused_position_ticks(), 0);
    }

    #[test]
    fn test_transpose_clamped() {
        let state = TransportState::default();
        state.set_global_transpose(500);
        assert_eq!(state.global_transpose(), 127);
        state.set_global_transpose(-12);
        assert_eq!(state.global_transpose(), -12);
    }

    #[test]
    fn test_fields_are_independent() {
        // A tempo write is visible without any position update. No field
        // waits on another.
        let state = TransportState::default();
        let hot = HotCounters::new();
        hot.publish_position(4.0, state.ticks_per_quarter());
        state.set_tempo(90.0);
        assert_eq!(state.tempo(), 90.0);
        assert_eq!(hot.current_tick(), 3840);

        state.set_ticks_per_quarter(480);
        // The published tick still reflects the resolution at write time.
        assert_eq!(hot.current_tick(), 3840);
    }

    #[test]
    fn test_hot_counters_cache_line() {
        assert_eq!(std::mem::align_of::<HotCounters>(), 64);
        let hot = HotCounters::new();
        hot.publish_roll(240, 1920);
        assert_eq!(hot.roll_interval_ticks(), 240);
        assert_eq!(hot.roll_start_tick(), 1920);
    }
}
