//! Engine configuration.
//!
//! [`EngineConfig`] is plain data handed in at construction; loading and
//! persisting it belongs to the caller. The fields that may change while
//! playing are mirrored into [`PlaybackSettings`], which the audio thread
//! reads once per block.

use crate::error::{Error, Result};
use crate::lockfree::{AtomicFlag, AtomicFloat};
use crate::recovery::{MAX_TEMPO, MIN_TEMPO};
use crate::transport::{LoopRegion, SyncSource, TimeSignature, DEFAULT_TICKS_PER_QUARTER};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f64,
    pub ticks_per_quarter: u32,
    pub tempo: f32,
    pub time_signature: TimeSignature,
    pub global_transpose: i32,
    pub sync_source: SyncSource,
    /// Apply seeks at the next beat boundary while playing.
    pub quantized_seek: bool,
    /// Under peer sync, hold start/stop/pause/resume until the next quantum.
    pub quantized_peer_transport: bool,
    /// Peer sync quantum in beats.
    pub peer_quantum: f64,
    /// 0..=1.
    pub swing: f32,
    /// 0..=1, fraction of velocity randomized.
    pub humanize_velocity: f32,
    /// Maximum timing jitter in beats.
    pub humanize_timing: f32,
    /// Roll/stutter division in notes per whole note (16 = sixteenths). 0 disables.
    pub roll_division: u32,
    pub loop_region: LoopRegion,
    pub scheduler_pool_size: usize,
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub notification_capacity: usize,
    /// Seed for probability and humanization; fixed for reproducible output.
    pub random_seed: u64,
    pub clock: ClockConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            ticks_per_quarter: DEFAULT_TICKS_PER_QUARTER,
            tempo: 120.0,
            time_signature: TimeSignature::default(),
            global_transpose: 0,
            sync_source: SyncSource::Internal,
            quantized_seek: false,
            quantized_peer_transport: true,
            peer_quantum: 4.0,
            swing: 0.0,
            humanize_velocity: 0.0,
            humanize_timing: 0.0,
            roll_division: 0,
            loop_region: LoopRegion::default(),
            scheduler_pool_size: 256,
            command_capacity: 256,
            event_capacity: 1024,
            notification_capacity: 64,
            random_seed: 0x6d65_7472_756d,
            clock: ClockConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0 && self.sample_rate.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.ticks_per_quarter == 0 {
            return Err(Error::InvalidConfig("ticks_per_quarter must be > 0".into()));
        }
        validate_tempo(self.tempo)?;
        self.time_signature.validate()?;
        if self.loop_region.enabled {
            self.loop_region.validate()?;
        }
        if !(self.peer_quantum > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "peer_quantum must be positive, got {}",
                self.peer_quantum
            )));
        }
        for (name, value) in [
            ("swing", self.swing),
            ("humanize_velocity", self.humanize_velocity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be within 0..=1, got {value}"
                )));
            }
        }
        if !(self.humanize_timing >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "humanize_timing must be non-negative, got {}",
                self.humanize_timing
            )));
        }
        if self.scheduler_pool_size == 0 || self.scheduler_pool_size > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "scheduler_pool_size must be within 1..=65535, got {}",
                self.scheduler_pool_size
            )));
        }
        for (name, value) in [
            ("command_capacity", self.command_capacity),
            ("event_capacity", self.event_capacity),
            ("notification_capacity", self.notification_capacity),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        self.clock.validate()
    }
}

/// Clock-generation thread settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Proportional phase-correction gain, 0..1.
    pub phase_gain: f64,
    /// Largest correction per pulse, as a fraction of the interval.
    pub max_correction: f64,
    /// Busy-wait window before each deadline, µs.
    pub spin_window_us: u64,
    /// Poll interval while the transport is not running, ms.
    pub idle_poll_ms: u64,
    pub queue_capacity: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            phase_gain: 0.1,
            max_correction: 0.05,
            spin_window_us: 500,
            idle_poll_ms: 20,
            queue_capacity: 256,
        }
    }
}

impl ClockConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.phase_gain) {
            return Err(Error::InvalidConfig(format!(
                "clock.phase_gain must be within 0..1, got {}",
                self.phase_gain
            )));
        }
        if !(0.0..=0.5).contains(&self.max_correction) {
            return Err(Error::InvalidConfig(format!(
                "clock.max_correction must be within 0..=0.5, got {}",
                self.max_correction
            )));
        }
        if self.idle_poll_ms == 0 || self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "clock.idle_poll_ms and clock.queue_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

pub fn validate_tempo(bpm: f32) -> Result<()> {
    if (MIN_TEMPO as f32..=MAX_TEMPO as f32).contains(&bpm) {
        Ok(())
    } else {
        Err(Error::InvalidTempo(bpm))
    }
}

/// Runtime-adjustable playback parameters. Each one is independent.
pub struct PlaybackSettings {
    swing: AtomicFloat,
    humanize_velocity: AtomicFloat,
    humanize_timing: AtomicFloat,
    roll_division: AtomicU32,
    quantized_seek: AtomicFlag,
}

impl PlaybackSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            swing: AtomicFloat::new(config.swing),
            humanize_velocity: AtomicFloat::new(config.humanize_velocity),
            humanize_timing: AtomicFloat::new(config.humanize_timing),
            roll_division: AtomicU32::new(config.roll_division),
            quantized_seek: AtomicFlag::new(config.quantized_seek),
        }
    }

    #[inline]
    pub fn swing(&self) -> f32 {
        self.swing.get()
    }

    pub fn set_swing(&self, amount: f32) {
        self.swing.set(amount.clamp(0.0, 1.0));
    }

    #[inline]
    pub fn humanize_velocity(&self) -> f32 {
        self.humanize_velocity.get()
    }

    pub fn set_humanize_velocity(&self, amount: f32) {
        self.humanize_velocity.set(amount.clamp(0.0, 1.0));
    }

    #[inline]
    pub fn humanize_timing(&self) -> f32 {
        self.humanize_timing.get()
    }

    pub fn set_humanize_timing(&self, beats: f32) {
        self.humanize_timing.set(beats.max(0.0));
    }

    #[inline]
    pub fn roll_division(&self) -> u32 {
        self.roll_division.load(Ordering::Acquire)
    }

    /// 0 releases the roll.
    pub fn set_roll_division(&self, division: u32) {
        self.roll_division.store(division, Ordering::Release);
    }

    #[inline]
    pub fn quantized_seek(&self) -> bool {
        self.quantized_seek.get()
    }

    pub fn set_quantized_seek(&self, enabled: bool) {
        self.quantized_seek.set(enabled);
    }

    /// Snapshot for one audio block.
    #[inline]
    pub fn load(&self) -> PlaybackParams {
        PlaybackParams {
            swing: self.swing.get(),
            humanize_velocity: self.humanize_velocity.get(),
            humanize_timing: self.humanize_timing.get(),
            roll_division: self.roll_division(),
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Per-block copy of [`PlaybackSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackParams {
    pub swing: f32,
    pub humanize_velocity: f32,
    pub humanize_timing: f32,
    pub roll_division: u32,
}

impl PlaybackParams {
    /// Roll cycle length in beats, if a roll is engaged.
    #[inline]
    pub fn roll_cycle_beats(&self) -> Option<f64> {
        (self.roll_division > 0).then(|| 4.0 / self.roll_division as f64)
    }
}
