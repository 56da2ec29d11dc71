//! Error types for metrum-core.
//!
//! Only construction and configuration paths return these. Anything running
//! on the audio thread reports through return values and counters instead.

use thiserror::Error;

/// Error type for metrum-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid tempo: {0}. Must be between 20.0 and 300.0 BPM")]
    InvalidTempo(f32),

    #[error("Invalid beat position: {0}. Must be non-negative")]
    InvalidBeat(f64),

    #[error("Invalid loop range: start={start}, end={end}")]
    InvalidLoopRange { start: f64, end: f64 },

    #[error("Invalid time signature: {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },

    #[error("Invalid event: channel={channel}, index={index}")]
    InvalidEvent { channel: u8, index: u8 },

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
