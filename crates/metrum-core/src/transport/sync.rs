//! Position sources and the published external-clock estimate.

use crate::lockfree::{AtomicCounter, AtomicDouble, AtomicFlag, AtomicFloat};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Which source is authoritative for musical position. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SyncSource {
    /// Internal tempo times elapsed samples.
    #[default]
    Internal = 0,
    /// Tempo recovered from an external 24 PPQN pulse clock.
    ExternalClock = 1,
    /// Beat and phase from a peer tempo-sync session.
    PeerSync = 2,
}

impl SyncSource {
    pub(crate) fn from_u8(val: u8) -> Self {
        match val {
            1 => SyncSource::ExternalClock,
            2 => SyncSource::PeerSync,
            _ => SyncSource::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncStatus {
    #[default]
    Unlocked = 0,
    /// Receiving pulses, not yet consistent enough to lock.
    Locking = 1,
    Locked = 2,
}

/// Output of the clock recovery filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockEstimate {
    /// Always within [20, 300] BPM.
    pub stable_tempo: f64,
    pub is_locked: bool,
    /// Standard deviation of accepted intervals, in microseconds.
    pub jitter_us: f64,
    pub last_pulse_us: u64,
    /// 0..=1.
    pub confidence: f32,
}

impl Default for ClockEstimate {
    fn default() -> Self {
        Self {
            stable_tempo: 120.0,
            is_locked: false,
            jitter_us: 0.0,
            last_pulse_us: 0,
            confidence: 0.0,
        }
    }
}

impl ClockEstimate {
    pub fn status(&self) -> SyncStatus {
        if self.is_locked {
            SyncStatus::Locked
        } else if self.last_pulse_us > 0 {
            SyncStatus::Locking
        } else {
            SyncStatus::Unlocked
        }
    }
}

/// [`ClockEstimate`] spread over independent atomics so the audio thread and
/// the clock generator can read it without locking. Fields may be observed
/// from different updates.
pub struct SharedClockEstimate {
    stable_tempo: AtomicDouble,
    is_locked: AtomicFlag,
    jitter_us: AtomicDouble,
    last_pulse_us: AtomicU64,
    confidence: AtomicFloat,
    outliers: AtomicCounter,
}

impl SharedClockEstimate {
    pub fn new() -> Self {
        let initial = ClockEstimate::default();
        Self {
            stable_tempo: AtomicDouble::new(initial.stable_tempo),
            is_locked: AtomicFlag::new(false),
            jitter_us: AtomicDouble::new(0.0),
            last_pulse_us: AtomicU64::new(0),
            confidence: AtomicFloat::new(0.0),
            outliers: AtomicCounter::new(),
        }
    }

    pub fn publish(&self, estimate: &ClockEstimate) {
        self.stable_tempo.set(estimate.stable_tempo);
        self.jitter_us.set(estimate.jitter_us);
        self.last_pulse_us
            .store(estimate.last_pulse_us, Ordering::Release);
        self.confidence.set(estimate.confidence);
        self.is_locked.set(estimate.is_locked);
    }

    pub fn record_outlier(&self) {
        self.outliers.increment();
    }

    #[inline]
    pub fn stable_tempo(&self) -> f64 {
        self.stable_tempo.get()
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.is_locked.get()
    }

    #[inline]
    pub fn last_pulse_us(&self) -> u64 {
        self.last_pulse_us.load(Ordering::Acquire)
    }

    pub fn outlier_count(&self) -> u64 {
        self.outliers.get()
    }

    pub fn load(&self) -> ClockEstimate {
        ClockEstimate {
            stable_tempo: self.stable_tempo.get(),
            is_locked: self.is_locked.get(),
            jitter_us: self.jitter_us.get(),
            last_pulse_us: self.last_pulse_us.load(Ordering::Acquire),
            confidence: self.confidence.get(),
        }
    }
}

impl Default for SharedClockEstimate {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime-switchable sync source.
pub struct SyncState {
    source: AtomicU8,
}

impl SyncState {
    pub fn new(source: SyncSource) -> Self {
        Self {
            source: AtomicU8::new(source as u8),
        }
    }

    #[inline]
    pub fn source(&self) -> SyncSource {
        SyncSource::from_u8(self.source.load(Ordering::Acquire))
    }

    pub fn set_source(&self, source: SyncSource) {
        self.source.store(source as u8, Ordering::Release);
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(SyncSource::Internal)
    }
}
