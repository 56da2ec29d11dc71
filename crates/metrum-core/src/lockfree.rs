//! Lock-free scalar cells shared between the audio thread and everyone else.
//!
//! Each cell is cache-line aligned so a field written every callback never
//! shares a line with one the UI polls occasionally.

use atomic_float::{AtomicF32, AtomicF64};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Acquire/release cell around one std or `atomic_float` atomic.
macro_rules! scalar_cell {
    ($(#[$meta:meta])* $name:ident, $atomic:ty, $scalar:ty, $zero:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        #[repr(align(64))]
        pub struct $name {
            value: $atomic,
        }

        impl $name {
            pub fn new(value: $scalar) -> Self {
                Self {
                    value: <$atomic>::new(value),
                }
            }

            #[inline]
            pub fn get(&self) -> $scalar {
                self.value.load(Ordering::Acquire)
            }

            #[inline]
            pub fn set(&self, value: $scalar) {
                self.value.store(value, Ordering::Release);
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new($zero)
            }
        }
    };
}

scalar_cell!(
    /// Tempo, swing and other per-block f32 knobs.
    AtomicFloat,
    AtomicF32,
    f32,
    0.0
);
scalar_cell!(
    /// Beat positions and recovered tempo.
    AtomicDouble,
    AtomicF64,
    f64,
    0.0
);
scalar_cell!(AtomicFlag, AtomicBool, bool, false);

/// Monotonic event counter (drops, overflows, outliers).
///
/// Incremented with relaxed ordering from the real-time side; readers only
/// need an eventually-correct total.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}
