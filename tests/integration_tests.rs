//! Integration tests for the Metrum timing bridge
//!
//! Test categories:
//! - Engine: construction, validation, endpoints, shutdown
//! - Transport: fluent control driven through the audio-thread processor
//! - Clock: external clock recovery and pulse clock output
//! - Snapshot: concurrent publication against a reading audio thread
//!
//! Run with:
//! ```bash
//! cargo test -p metrum --test integration_tests
//! ```

mod helpers;
mod integration;
