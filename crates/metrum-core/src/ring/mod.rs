//! Fixed-capacity channels - the only legal path between the audio thread
//! and every other thread.
//!
//! Three flavours share the same ring storage and power-of-two sizing:
//!
//! - [`pipe`]: single producer, single consumer. Audio to UI and back.
//! - [`broadcast`]: several producers behind a spin-guarded reservation,
//!   one consumer. Lossy: visuals and logs never outrank audio.
//! - [`drain`]: single producer, single consumer whose consumer thread sleeps
//!   until a push wakes it, for hardware message delivery.
//!
//! All three drop on overflow instead of blocking the producer, and none of
//! them allocate after construction.

pub mod broadcast;
pub mod drain;
pub mod pipe;

pub use broadcast::{broadcast_buffer, BroadcastReceiver, BroadcastSender};
pub use drain::{drain_queue, DrainConsumer, DrainProducer};
pub use pipe::{event_pipe, PipeConsumer, PipeProducer};

/// Smallest capacity any channel is created with.
pub const MIN_CAPACITY: usize = 2;

/// Round a requested capacity up to the power of two actually allocated.
#[inline]
pub fn capacity_for(requested: usize) -> usize {
    requested.max(MIN_CAPACITY).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(capacity_for(0), 2);
        assert_eq!(capacity_for(1), 2);
        assert_eq!(capacity_for(64), 64);
        assert_eq!(capacity_for(65), 128);
        assert_eq!(capacity_for(1000), 1024);
    }
}
