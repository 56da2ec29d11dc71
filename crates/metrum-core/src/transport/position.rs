//! Musical position and loop region.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A position in quarter-note beats.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct MusicalPosition {
    pub beats: f64,
}

impl MusicalPosition {
    #[inline]
    pub const fn from_beats(beats: f64) -> Self {
        Self { beats }
    }

    #[inline]
    pub fn from_ticks(ticks: u64, ticks_per_quarter: u32) -> Self {
        Self {
            beats: ticks as f64 / ticks_per_quarter.max(1) as f64,
        }
    }

    /// Whole ticks, truncated. Negative positions read as zero.
    #[inline]
    pub fn to_ticks(self, ticks_per_quarter: u32) -> u64 {
        (self.beats.max(0.0) * ticks_per_quarter as f64) as u64
    }
}

impl core::ops::Add<f64> for MusicalPosition {
    type Output = Self;

    #[inline]
    fn add(self, beats: f64) -> Self {
        Self {
            beats: self.beats + beats,
        }
    }
}

impl core::ops::AddAssign<f64> for MusicalPosition {
    #[inline]
    fn add_assign(&mut self, beats: f64) {
        self.beats += beats;
    }
}

impl core::ops::Sub<MusicalPosition> for MusicalPosition {
    type Output = f64;

    #[inline]
    fn sub(self, other: MusicalPosition) -> f64 {
        self.beats - other.beats
    }
}

/// Loop region in beats. `max_iterations == 0` loops forever.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
    pub enabled: bool,
    pub max_iterations: u32,
}

impl LoopRegion {
    #[inline]
    pub const fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            enabled: true,
            max_iterations: 0,
        }
    }

    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.start >= 0.0 && self.end > self.start && self.end.is_finite()) {
            return Err(Error::InvalidLoopRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.end - self.start
    }
}

impl Default for LoopRegion {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 4.0,
            enabled: false,
            max_iterations: 0,
        }
    }
}
