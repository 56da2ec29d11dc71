//! Clock recovery: noisy 24 PPQN pulse timestamps in, stable tempo out.
//!
//! Keeps a fixed ring of recent inter-pulse intervals with a running sum and
//! sum of squares. Intervals further than [`OUTLIER_SIGMA`] standard
//! deviations from the mean are left out of the statistics, which absorbs
//! per-pulse jitter as well as single dropped or doubled pulses. A run of
//! mutually consistent outliers is taken as a real tempo change and reseeds
//! the history.
//!
//! Runs on whichever thread receives pulses. Allocation-free after
//! construction.

use crate::transport::sync::{ClockEstimate, SharedClockEstimate};
use std::sync::Arc;

/// Pulses per quarter note in the supported clock standard.
pub const PULSES_PER_QUARTER: f64 = 24.0;

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 300.0;

/// Intervals kept in the history ring.
pub const HISTORY_LEN: usize = 24;

/// Rejection threshold in standard deviations.
pub const OUTLIER_SIGMA: f64 = 3.0;

/// Samples required before outlier rejection engages.
pub const MIN_SAMPLES_FOR_REJECTION: usize = 6;

/// Consecutive accepted intervals required to lock.
pub const LOCK_AFTER_PULSES: u32 = 12;

/// Consecutive consistent outliers accepted as a tempo change.
pub const TEMPO_CHANGE_AFTER: usize = 8;

/// A pulse gap this long (µs) means the clock went away.
pub const DROPOUT_US: u64 = 250_000;

/// Floor on the deviation used for rejection, as a fraction of the mean.
const SIGMA_FLOOR_FRACTION: f64 = 0.02;

pub struct ClockRecoveryFilter {
    intervals: [f64; HISTORY_LEN],
    write_index: usize,
    count: usize,
    sum: f64,
    sum_sq: f64,

    recent_outliers: [f64; TEMPO_CHANGE_AFTER],
    consecutive_outliers: usize,
    consecutive_good: u32,
    total_outliers: u64,

    last_pulse_us: Option<u64>,
    stable_tempo: f64,
    locked: bool,

    shared: Option<Arc<SharedClockEstimate>>,
}

impl ClockRecoveryFilter {
    pub fn new() -> Self {
        Self {
            intervals: [0.0; HISTORY_LEN],
            write_index: 0,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            recent_outliers: [0.0; TEMPO_CHANGE_AFTER],
            consecutive_outliers: 0,
            consecutive_good: 0,
            total_outliers: 0,
            last_pulse_us: None,
            stable_tempo: ClockEstimate::default().stable_tempo,
            locked: false,
            shared: None,
        }
    }

    /// Mirror every update into `shared` for lock-free readers.
    pub fn with_shared(mut self, shared: Arc<SharedClockEstimate>) -> Self {
        shared.publish(&self.estimate());
        self.shared = Some(shared);
        self
    }

    /// Feed one pulse arrival time (monotonic µs). Returns `true` when the
    /// lock state changed.
    pub fn on_pulse(&mut self, timestamp_us: u64) -> bool {
        let was_locked = self.locked;

        if let Some(last) = self.last_pulse_us {
            if timestamp_us <= last {
                return false;
            }
            let interval = timestamp_us - last;
            if interval >= DROPOUT_US {
                self.clear_statistics();
            } else {
                self.observe(interval as f64);
            }
        }

        // The pulse's own timestamp is kept for phase even when its
        // interval was rejected.
        self.last_pulse_us = Some(timestamp_us);
        self.publish();
        was_locked != self.locked
    }

    /// Unlock if no pulse has arrived within the dropout window. Returns
    /// `true` when the lock state changed.
    pub fn check_timeout(&mut self, now_us: u64) -> bool {
        let Some(last) = self.last_pulse_us else {
            return false;
        };
        if now_us.saturating_sub(last) < DROPOUT_US {
            return false;
        }
        let was_locked = self.locked;
        if self.count > 0 || was_locked {
            self.clear_statistics();
            self.publish();
        }
        was_locked
    }

    pub fn reset(&mut self) {
        self.clear_statistics();
        self.last_pulse_us = None;
        self.total_outliers = 0;
        self.publish();
    }

    pub fn estimate(&self) -> ClockEstimate {
        ClockEstimate {
            stable_tempo: self.stable_tempo,
            is_locked: self.locked,
            jitter_us: self.std_dev(),
            last_pulse_us: self.last_pulse_us.unwrap_or(0),
            confidence: self.confidence(),
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn outlier_count(&self) -> u64 {
        self.total_outliers
    }

    /// Intervals currently held in the history.
    pub fn sample_count(&self) -> usize {
        self.count
    }

    fn observe(&mut self, interval: f64) {
        if self.count >= MIN_SAMPLES_FOR_REJECTION && self.is_outlier(interval) {
            self.record_outlier(interval);
            return;
        }

        self.push_interval(interval);
        self.consecutive_outliers = 0;
        self.consecutive_good = self.consecutive_good.saturating_add(1);
        if !self.locked && self.consecutive_good >= LOCK_AFTER_PULSES {
            self.locked = true;
        }
        self.stable_tempo = interval_to_bpm(self.mean());
    }

    fn is_outlier(&self, interval: f64) -> bool {
        let mean = self.mean();
        let sigma = self.std_dev().max(mean * SIGMA_FLOOR_FRACTION);
        (interval - mean).abs() > OUTLIER_SIGMA * sigma
    }

    fn record_outlier(&mut self, interval: f64) {
        self.total_outliers += 1;
        if let Some(shared) = &self.shared {
            shared.record_outlier();
        }
        self.consecutive_good = 0;
        self.recent_outliers[self.consecutive_outliers % TEMPO_CHANGE_AFTER] = interval;
        self.consecutive_outliers += 1;

        if self.consecutive_outliers >= TEMPO_CHANGE_AFTER {
            if self.outliers_agree() {
                self.reseed_from_outliers();
            } else {
                self.consecutive_outliers = 0;
            }
        }
    }

    /// Jitter produces outliers on both sides of the mean; a tempo change
    /// produces a tight cluster away from it.
    fn outliers_agree(&self) -> bool {
        let (min, max, sum) = self
            .recent_outliers
            .iter()
            .fold((f64::MAX, f64::MIN, 0.0), |(lo, hi, s), &v| {
                (lo.min(v), hi.max(v), s + v)
            });
        let mean = sum / TEMPO_CHANGE_AFTER as f64;
        (max - min) <= 4.0 * mean * SIGMA_FLOOR_FRACTION
    }

    fn reseed_from_outliers(&mut self) {
        let seed = self.recent_outliers;
        self.clear_statistics();
        for interval in seed {
            self.push_interval(interval);
        }
        self.consecutive_good = seed.len() as u32;
        self.stable_tempo = interval_to_bpm(self.mean());
    }

    fn push_interval(&mut self, interval: f64) {
        if self.count == HISTORY_LEN {
            let old = self.intervals[self.write_index];
            self.sum -= old;
            self.sum_sq -= old * old;
        } else {
            self.count += 1;
        }
        self.intervals[self.write_index] = interval;
        self.sum += interval;
        self.sum_sq += interval * interval;
        self.write_index = (self.write_index + 1) % HISTORY_LEN;
    }

    fn clear_statistics(&mut self) {
        self.intervals = [0.0; HISTORY_LEN];
        self.write_index = 0;
        self.count = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
        self.consecutive_outliers = 0;
        self.consecutive_good = 0;
        self.locked = false;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }

    fn confidence(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let fill = (self.consecutive_good as f64 / LOCK_AFTER_PULSES as f64).min(1.0);
        let variation = self.std_dev() / self.mean();
        let stability = (1.0 - variation * 10.0).clamp(0.0, 1.0);
        (fill * stability) as f32
    }

    fn publish(&self) {
        if let Some(shared) = &self.shared {
            shared.publish(&self.estimate());
        }
    }
}

impl Default for ClockRecoveryFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean pulse interval (µs) to BPM, clamped to the instrument range.
#[inline]
pub fn interval_to_bpm(interval_us: f64) -> f64 {
    if interval_us <= 0.0 {
        return MAX_TEMPO;
    }
    (60_000_000.0 / (interval_us * PULSES_PER_QUARTER)).clamp(MIN_TEMPO, MAX_TEMPO)
}

/// Pulse interval (µs) at `bpm`.
#[inline]
pub fn bpm_to_interval(bpm: f64) -> f64 {
    60_000_000.0 / (bpm.clamp(MIN_TEMPO, MAX_TEMPO) * PULSES_PER_QUARTER)
}
