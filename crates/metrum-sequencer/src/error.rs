//! Error types for the sequencer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid scheduler pool size: {0}. Must be between 1 and 65535")]
    InvalidPoolSize(usize),

    #[error(transparent)]
    Core(#[from] metrum_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
