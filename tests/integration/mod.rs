//! Integration test modules for Metrum

pub mod clock;
pub mod engine;
pub mod snapshot;
pub mod transport;
