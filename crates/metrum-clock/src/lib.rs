//! Clock threads for metrum.
//!
//! - [`ClockGenerator`]: a max-priority worker emitting a 24 PPQN pulse stream
//!   locked to the transport tempo, with a low-gain phase correction toward
//!   a recovered external clock
//! - [`TimerHub`]: one driving thread serving many cheap periodic
//!   subscribers, constructed and owned explicitly

pub mod error;
pub mod generator;
pub mod timer;

pub use error::{Error, Result};
pub use generator::{next_interval_us, phase_error_us, ClockGenerator, ClockMessage};
pub use timer::{Subscription, TimerHub};
