//! Meter and bar/beat/tick addressing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Checked constructor: numerator 1..=32, denominator a power of two up to 32.
    pub fn try_new(numerator: u32, denominator: u32) -> Result<Self> {
        let sig = Self::new(numerator, denominator);
        sig.validate()?;
        Ok(sig)
    }

    pub fn validate(&self) -> Result<()> {
        let valid = (1..=32).contains(&self.numerator)
            && self.denominator.is_power_of_two()
            && self.denominator <= 32;
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidTimeSignature {
                numerator: self.numerator,
                denominator: self.denominator,
            })
        }
    }

    /// Bar length in quarter-note beats.
    #[inline]
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Bar / beat / tick position. Bars and beats are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BBT {
    pub bar: u32,
    pub beat: u32,
    pub ticks: u32,
}

impl BBT {
    pub fn new(bar: u32, beat: u32, ticks: u32) -> Self {
        Self { bar, beat, ticks }
    }

    pub fn from_beats(beats: f64, sig: TimeSignature, ticks_per_quarter: u32) -> Self {
        let beats = beats.max(0.0);
        let beats_per_bar = sig.beats_per_bar();
        let bar = (beats / beats_per_bar).floor();
        let in_bar = beats - bar * beats_per_bar;
        let beat_unit = 4.0 / sig.denominator as f64;
        let beat = (in_bar / beat_unit).floor();
        let ticks = ((in_bar - beat * beat_unit) * ticks_per_quarter as f64).floor();
        Self {
            bar: bar as u32 + 1,
            beat: beat as u32 + 1,
            ticks: ticks as u32,
        }
    }

    pub fn to_beats(&self, sig: TimeSignature, ticks_per_quarter: u32) -> f64 {
        let beat_unit = 4.0 / sig.denominator as f64;
        self.bar.saturating_sub(1) as f64 * sig.beats_per_bar()
            + self.beat.saturating_sub(1) as f64 * beat_unit
            + self.ticks as f64 / ticks_per_quarter.max(1) as f64
    }
}
