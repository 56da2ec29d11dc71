//! Centralized error type for the metrum umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] metrum_core::Error),

    #[error("Sequencer: {0}")]
    Sequencer(#[from] metrum_sequencer::Error),

    #[cfg(feature = "clock")]
    #[error("Clock: {0}")]
    Clock(#[from] metrum_clock::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
