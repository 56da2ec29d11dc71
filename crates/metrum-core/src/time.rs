//! Monotonic microsecond host clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic microsecond timestamps shared by the engine, the peer
/// session and the clock generator.
pub trait HostClock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Wall-clock-independent monotonic time since construction.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for MonotonicClock {
    #[inline]
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Externally driven clock for offline rendering and deterministic tests.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now: AtomicU64::new(start_us),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now.store(now_us, Ordering::Release);
    }

    pub fn advance(&self, delta_us: u64) -> u64 {
        self.now.fetch_add(delta_us, Ordering::AcqRel) + delta_us
    }
}

impl HostClock for ManualClock {
    #[inline]
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
