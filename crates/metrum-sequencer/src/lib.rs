//! Audio-thread sequencing for metrum.
//!
//! - [`DeferredScheduler`]: beat-targeted events from any thread, fired on
//!   the audio thread from a fixed slot pool
//! - [`StepSequencer`]: grid steps with swing, roll, probability and
//!   humanization
//! - [`TransportEngine`]: the per-callback driver tying transport, scheduler,
//!   sequencer and file playback together

pub mod engine;
pub mod error;
pub mod file;
pub mod scheduler;
pub mod step;

pub use engine::{EngineContext, EngineEndpoints, TransportEngine, TransportNotification};
pub use error::{Error, Result};
pub use scheduler::{CommandItem, DeferredScheduler, SchedulerHandle, DEFAULT_POOL_SIZE};
pub use step::{apply_swing, RollWindow, StepSequencer, SWING_FACTOR};
