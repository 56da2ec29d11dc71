//! Step-sequencer evaluation.
//!
//! Each [`StepTrack`] is a grid of steps repeating forever. For a beat span the
//! sequencer finds the grid steps that land inside it, applies swing, gates on
//! probability, humanizes velocity and timing, emits the note-on and schedules
//! the note-off through the [`DeferredScheduler`].
//!
//! While a roll is engaged the grid is replaced by a short cycle that repeats
//! from a fixed anchor. Sub-steps are tracked per track so a ratchet fires once
//! per sub-step even when the span is split across several calls.

use crate::scheduler::DeferredScheduler;
use metrum_core::{
    BridgeEvent, EventSink, EventSource, PlaybackParams, SequenceSnapshot, Step, StepTrack,
    MAX_TRACKS,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Fraction of a step an odd step is delayed at full swing.
pub const SWING_FACTOR: f64 = 0.5;

/// Shortest note the sequencer emits, in beats.
const MIN_GATE_BEATS: f64 = 1.0 / 1024.0;

/// Delay off-grid (odd) steps by `step_duration * swing * SWING_FACTOR`.
/// Even steps are returned unchanged.
#[inline]
pub fn apply_swing(beat: f64, step_index: u64, step_duration: f64, swing: f32) -> f64 {
    if step_index % 2 == 1 {
        beat + step_duration * swing.clamp(0.0, 1.0) as f64 * SWING_FACTOR
    } else {
        beat
    }
}

/// An engaged roll: the span `[anchor, anchor + cycle)` repeats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollWindow {
    pub anchor: f64,
    pub cycle: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RollState {
    /// Signed: spans before the anchor map to negative cycles.
    last_sub_step: Option<i64>,
}

pub struct StepSequencer {
    rng: SmallRng,
    rolls: [RollState; MAX_TRACKS],
}

impl StepSequencer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            rolls: [RollState::default(); MAX_TRACKS],
        }
    }

    /// Forget ratchet progress on every track.
    pub fn reset_rolls(&mut self) {
        self.rolls = [RollState::default(); MAX_TRACKS];
    }

    /// Emit every step of `snapshot` landing in `[start, end)`. Returns the
    /// number of notes triggered.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        snapshot: &SequenceSnapshot,
        start: f64,
        end: f64,
        params: &PlaybackParams,
        roll: Option<RollWindow>,
        transpose: i32,
        scheduler: &mut DeferredScheduler,
        sink: &mut impl EventSink,
    ) -> usize {
        if end <= start {
            return 0;
        }

        let mut triggered = 0;
        for (index, track) in snapshot.tracks.iter().enumerate().take(MAX_TRACKS) {
            if track.steps.is_empty() {
                continue;
            }
            triggered += match roll {
                Some(window) => self.evaluate_roll(
                    index, track, window, start, end, params, transpose, scheduler, sink,
                ),
                None => self.evaluate_grid(track, start, end, params, transpose, scheduler, sink),
            };
        }
        triggered
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_grid(
        &mut self,
        track: &StepTrack,
        start: f64,
        end: f64,
        params: &PlaybackParams,
        transpose: i32,
        scheduler: &mut DeferredScheduler,
        sink: &mut impl EventSink,
    ) -> usize {
        let duration = track.step_duration();
        let max_shift = duration * params.swing.clamp(0.0, 1.0) as f64 * SWING_FACTOR;
        // A swung step may start up to `max_shift` after its grid line, so
        // look one shift back.
        let first = ((start - max_shift) / duration).floor().max(0.0) as u64;
        let last = (end / duration).ceil().max(0.0) as u64;

        let mut triggered = 0;
        for global in first..last {
            let at = apply_swing(global as f64 * duration, global, duration, params.swing);
            if at < start || at >= end {
                continue;
            }
            let step = track.steps[(global % track.steps.len() as u64) as usize];
            let length = (step.gate as f64 * duration).max(MIN_GATE_BEATS);
            if self.trigger(track.channel, step, at, length, params, transpose, scheduler, sink) {
                triggered += 1;
            }
        }
        triggered
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_roll(
        &mut self,
        index: usize,
        track: &StepTrack,
        window: RollWindow,
        start: f64,
        end: f64,
        params: &PlaybackParams,
        transpose: i32,
        scheduler: &mut DeferredScheduler,
        sink: &mut impl EventSink,
    ) -> usize {
        if !(window.cycle > 0.0) {
            return 0;
        }
        let duration = track.step_duration();
        // A cycle shorter than a step still fires once per cycle.
        let steps_in_cycle = (window.cycle / duration).ceil().max(1.0) as u64;
        let anchor_step = (window.anchor / duration).round().max(0.0) as u64;
        let length = (duration.min(window.cycle) * 0.5).max(MIN_GATE_BEATS);

        let first_cycle = ((start - window.anchor) / window.cycle).floor() as i64;
        let last_cycle = ((end - window.anchor) / window.cycle).ceil() as i64;

        let mut triggered = 0;
        for cycle in first_cycle..last_cycle {
            let cycle_start = window.anchor + cycle as f64 * window.cycle;
            for sub in 0..steps_in_cycle {
                let offset = sub as f64 * duration;
                if offset >= window.cycle {
                    break;
                }
                let at = cycle_start + offset;
                if at < start || at >= end {
                    continue;
                }
                let key = cycle * steps_in_cycle as i64 + sub as i64;
                if self.rolls[index].last_sub_step == Some(key) {
                    continue;
                }
                self.rolls[index].last_sub_step = Some(key);

                let global = anchor_step + sub;
                let step = track.steps[(global % track.steps.len() as u64) as usize];
                if self.trigger(track.channel, step, at, length, params, transpose, scheduler, sink)
                {
                    triggered += 1;
                }
            }
        }
        triggered
    }

    #[allow(clippy::too_many_arguments)]
    fn trigger(
        &mut self,
        channel: u8,
        step: Step,
        at: f64,
        length: f64,
        params: &PlaybackParams,
        transpose: i32,
        scheduler: &mut DeferredScheduler,
        sink: &mut impl EventSink,
    ) -> bool {
        if !step.active {
            return false;
        }
        if step.probability < 1.0 && self.rng.gen::<f32>() >= step.probability {
            return false;
        }

        let mut velocity = step.velocity;
        if params.humanize_velocity > 0.0 {
            let jitter = self.rng.gen_range(-1.0f32..=1.0) * params.humanize_velocity;
            velocity = (velocity * (1.0 + jitter)).clamp(0.01, 1.0);
        }

        // Timing humanization only ever delays, so a note never lands in a
        // span that has already been rendered.
        let delay = if params.humanize_timing > 0.0 {
            self.rng.gen::<f64>() * params.humanize_timing as f64
        } else {
            0.0
        };

        let note_on = BridgeEvent::note_on(EventSource::Sequencer, channel, step.note, velocity)
            .transposed(transpose);
        let note_off =
            BridgeEvent::note_off(EventSource::Sequencer, channel, step.note).transposed(transpose);

        // Never emit a note-on whose note-off cannot be scheduled.
        let needed = if delay > 0.0 { 2 } else { 1 };
        if !scheduler.try_reserve(needed) {
            return false;
        }

        let on_beat = at + delay;
        if delay > 0.0 {
            scheduler.schedule_local(note_on, on_beat);
        } else {
            sink.emit(note_on);
        }
        scheduler.schedule_local(note_off, on_beat + length);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use metrum_core::EventKind;
    use proptest::prelude::*;

    fn snapshot(track: StepTrack) -> SequenceSnapshot {
        SequenceSnapshot::empty().with_track(track)
    }

    fn four_on_floor(channel: u8) -> StepTrack {
        let steps = vec![Step::note(36, 0.8), Step::rest(), Step::rest(), Step::rest()];
        StepTrack::new(channel, 4, steps)
    }

    fn scheduler() -> DeferredScheduler {
        DeferredScheduler::new(64, 16).unwrap().0
    }

    fn note_ons(events: &[BridgeEvent]) -> Vec<BridgeEvent> {
        events.iter().copied().filter(|e| e.is_note_on()).collect()
    }

    #[test]
    fn test_swing_leaves_even_steps() {
        assert_eq!(apply_swing(1.0, 4, 0.25, 1.0), 1.0);
        assert_relative_eq!(apply_swing(1.25, 5, 0.25, 1.0), 1.25 + 0.125);
        assert_relative_eq!(apply_swing(1.25, 5, 0.25, 0.5), 1.25 + 0.0625);
    }

    #[test]
    fn test_grid_fires_once_per_step_across_split_spans() {
        let snap = snapshot(four_on_floor(10));
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();
        let params = PlaybackParams::default();

        let mut out = Vec::new();
        for i in 0..16 {
            let start = i as f64 * 0.25;
            seq.evaluate(&snap, start, start + 0.25, &params, None, 0, &mut sched, &mut out);
        }
        // One note per beat over four beats.
        assert_eq!(note_ons(&out).len(), 4);
        assert_eq!(sched.active_count(), 4);
    }

    #[test]
    fn test_note_off_scheduled_at_gate() {
        let track = StepTrack::new(1, 1, vec![Step::note(60, 1.0).with_gate(0.5)]);
        let snap = snapshot(track);
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();

        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 0.1, &PlaybackParams::default(), None, 0, &mut sched, &mut out);
        assert_eq!(out.len(), 1);

        out.clear();
        sched.process_span(&mut out, 0.1, 0.5);
        assert!(out.is_empty());
        sched.process_span(&mut out, 0.5, 0.6);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EventKind::NoteOff);
    }

    #[test]
    fn test_swung_step_lands_late() {
        let track = StepTrack::new(1, 2, vec![Step::note(60, 1.0), Step::note(62, 1.0)]);
        let snap = snapshot(track);
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();
        let params = PlaybackParams {
            swing: 1.0,
            ..Default::default()
        };

        let mut out = Vec::new();
        // Odd step at 0.5 moves to 0.75.
        seq.evaluate(&snap, 0.0, 0.7, &params, None, 0, &mut sched, &mut out);
        assert_eq!(note_ons(&out).len(), 1);
        out.clear();
        seq.evaluate(&snap, 0.7, 0.8, &params, None, 0, &mut sched, &mut out);
        assert_eq!(note_ons(&out)[0].index, 62);
    }

    #[test]
    fn test_probability_zero_never_fires() {
        let track = StepTrack::new(1, 4, vec![Step::note(60, 1.0).with_probability(0.0)]);
        let snap = snapshot(track);
        let mut seq = StepSequencer::new(7);
        let mut sched = scheduler();
        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 8.0, &PlaybackParams::default(), None, 0, &mut sched, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_same_seed_same_output() {
        let track = StepTrack::new(1, 4, vec![Step::note(60, 0.7).with_probability(0.5)]);
        let snap = snapshot(track);
        let params = PlaybackParams {
            humanize_velocity: 0.3,
            ..Default::default()
        };

        let run = |seed| {
            let mut seq = StepSequencer::new(seed);
            let mut sched = DeferredScheduler::new(512, 16).unwrap().0;
            let mut out = Vec::new();
            seq.evaluate(&snap, 0.0, 16.0, &params, None, 0, &mut sched, &mut out);
            out
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_humanized_velocity_stays_in_range() {
        let track = StepTrack::new(1, 4, vec![Step::note(60, 0.9)]);
        let snap = snapshot(track);
        let params = PlaybackParams {
            humanize_velocity: 1.0,
            ..Default::default()
        };
        let mut seq = StepSequencer::new(3);
        let mut sched = DeferredScheduler::new(512, 16).unwrap().0;
        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 32.0, &params, None, 0, &mut sched, &mut out);
        assert!(!out.is_empty());
        assert!(out.iter().all(|e| (0.01..=1.0).contains(&e.value)));
    }

    #[test]
    fn test_humanized_timing_defers_note_on() {
        let track = StepTrack::new(1, 1, vec![Step::note(60, 1.0)]);
        let snap = snapshot(track);
        let params = PlaybackParams {
            humanize_timing: 0.2,
            ..Default::default()
        };
        let mut seq = StepSequencer::new(5);
        let mut sched = scheduler();
        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 0.5, &params, None, 0, &mut sched, &mut out);
        // Note-on and note-off both go through the scheduler.
        assert!(out.is_empty());
        assert_eq!(sched.active_count(), 2);

        sched.process_span(&mut out, 0.0, 0.2);
        assert_eq!(note_ons(&out).len(), 1);
    }

    #[test]
    fn test_transpose_applies_to_both_edges() {
        let track = StepTrack::new(1, 1, vec![Step::note(60, 1.0)]);
        let snap = snapshot(track);
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();
        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 0.5, &PlaybackParams::default(), None, 5, &mut sched, &mut out);
        sched.process_span(&mut out, 0.0, 1.0);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| e.index == 65));
    }

    #[test]
    fn test_roll_repeats_anchor_region() {
        // Eight sixteenths: 60, 61, ... 67.
        let steps = (60..68).map(|n| Step::note(n, 1.0)).collect();
        let snap = snapshot(StepTrack::new(1, 4, steps));
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();
        let roll = RollWindow {
            anchor: 0.5,
            cycle: 0.5,
        };

        let mut out = Vec::new();
        let params = PlaybackParams::default();
        seq.evaluate(&snap, 0.5, 2.5, &params, Some(roll), 0, &mut sched, &mut out);
        let notes: Vec<u8> = note_ons(&out).iter().map(|e| e.index).collect();
        assert_eq!(notes, vec![62, 63, 62, 63, 62, 63, 62, 63]);
    }

    #[test]
    fn test_roll_keeps_cycling_before_its_anchor() {
        let steps = (60..68).map(|n| Step::note(n, 1.0)).collect();
        let snap = snapshot(StepTrack::new(1, 4, steps));
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();
        // Engaged at beat 2, then playback jumped back to 0.
        let roll = RollWindow {
            anchor: 2.0,
            cycle: 0.5,
        };

        let mut out = Vec::new();
        let params = PlaybackParams::default();
        seq.evaluate(&snap, 0.0, 1.0, &params, Some(roll), 0, &mut sched, &mut out);
        let notes: Vec<u8> = note_ons(&out).iter().map(|e| e.index).collect();
        assert_eq!(notes, vec![60, 61, 60, 61]);
    }

    #[test]
    fn test_roll_ratchet_fires_once_per_sub_step_across_splits() {
        let snap = snapshot(StepTrack::new(1, 4, vec![Step::note(60, 1.0)]));
        let mut seq = StepSequencer::new(1);
        let mut sched = DeferredScheduler::new(512, 16).unwrap().0;
        // Thirty-second roll: cycle shorter than a step.
        let roll = RollWindow {
            anchor: 0.0,
            cycle: 0.125,
        };

        let params = PlaybackParams::default();
        let mut out = Vec::new();
        // Spans of 0.05 beats up to 0.95: cycles start at 0, 0.125 .. 0.875.
        for i in 0..19 {
            let (start, end) = (i as f64 * 0.05, (i + 1) as f64 * 0.05);
            seq.evaluate(&snap, start, end, &params, Some(roll), 0, &mut sched, &mut out);
        }
        assert_eq!(note_ons(&out).len(), 8);
    }

    #[test]
    fn test_roll_state_is_per_track() {
        let snap = SequenceSnapshot::empty()
            .with_track(StepTrack::new(1, 4, vec![Step::note(60, 1.0)]))
            .with_track(StepTrack::new(2, 4, vec![Step::note(40, 1.0)]));
        let mut seq = StepSequencer::new(1);
        let mut sched = scheduler();
        let roll = RollWindow {
            anchor: 0.0,
            cycle: 0.25,
        };

        let params = PlaybackParams::default();
        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 0.5, &params, Some(roll), 0, &mut sched, &mut out);
        let ons = note_ons(&out);
        assert_eq!(ons.iter().filter(|e| e.channel == 1).count(), 2);
        assert_eq!(ons.iter().filter(|e| e.channel == 2).count(), 2);
    }

    #[test]
    fn test_exhausted_pool_suppresses_note_on() {
        let snap = snapshot(StepTrack::new(1, 4, vec![Step::note(60, 1.0)]));
        let mut seq = StepSequencer::new(1);
        let mut sched = DeferredScheduler::new(2, 16).unwrap().0;
        let mut out = Vec::new();
        seq.evaluate(&snap, 0.0, 1.0, &PlaybackParams::default(), None, 0, &mut sched, &mut out);
        assert_eq!(note_ons(&out).len(), 2);
        assert_eq!(sched.pool_exhausted_count(), 2);
    }

    proptest! {
        #[test]
        fn swing_is_monotonic_in_amount(
            index in 0u64..1024,
            a in 0.0f32..=1.0,
            b in 0.0f32..=1.0,
            duration in 0.01f64..1.0,
        ) {
            let beat = index as f64 * duration;
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let swung_lo = apply_swing(beat, index, duration, lo);
            let swung_hi = apply_swing(beat, index, duration, hi);
            prop_assert!(swung_lo <= swung_hi);
            if index % 2 == 0 {
                prop_assert_eq!(swung_hi, beat);
            } else {
                let expected = beat + duration * hi as f64 * SWING_FACTOR;
                prop_assert!((swung_hi - expected).abs() < 1e-12);
            }
        }
    }
}
