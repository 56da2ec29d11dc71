//! Tolerance constants for timing tests.
//!
//! Positions are accumulated in f64 from block lengths, so a whole session
//! of blocks stays far inside `BEAT_EPSILON`. Recovered tempo carries the
//! integer-microsecond rounding of pulse timestamps.

/// Beat positions computed from exact block arithmetic.
pub const BEAT_EPSILON: f64 = 1e-9;

/// Tempo recovered from an external pulse clock, in BPM.
pub const RECOVERED_TEMPO_EPSILON: f64 = 0.05;
