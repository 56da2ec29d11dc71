//! Error types for the clock threads.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to spawn clock thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Clock thread is already running")]
    AlreadyRunning,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
