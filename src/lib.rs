//! # Metrum - Real-time Musical Timing Bridge
//!
//! Sample-accurate musical time for an audio callback, fed from and feeding
//! the outside world.
//!
//! ## Architecture
//!
//! Metrum is an umbrella crate that coordinates:
//! - **metrum-core** - Ring channels, clock recovery, transport state, snapshots
//! - **metrum-sequencer** - Deferred event scheduler, step sequencing, per-block transport driver
//! - **metrum-clock** - Realtime pulse clock thread and timer hub
//!
//! ## Quick Start
//!
//! ```ignore
//! use metrum::prelude::*;
//!
//! let mut engine = MetrumEngine::builder()
//!     .sample_rate(48_000.0)
//!     .sequence(
//!         SequenceSnapshot::new(960)
//!             .with_track(StepTrack::new(1, 4, vec![Step::note(36, 1.0); 16]))
//!             .with_length(4.0),
//!     )
//!     .build()?;
//!
//! let mut processor = engine.take_processor().unwrap();
//! let mut events = engine.take_events().unwrap();
//!
//! engine.transport().loop_range(0.0, 4.0).play();
//!
//! // Audio thread, once per buffer:
//! processor.process_audio_block(512, 48_000.0);
//!
//! // Any other thread:
//! while let Some(event) = events.pop() { /* deliver */ }
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Everything below
//! - `clock` - Pulse clock output thread and timer hub

/// Re-export of metrum-core for direct access
pub use metrum_core as core;

/// Re-export of metrum-sequencer for direct access
pub use metrum_sequencer as sequencer;

#[cfg(feature = "clock")]
pub use metrum_clock as clock;

// Core types
pub use metrum_core::{
    BridgeEvent, ChannelShadow, ClockEstimate, ClockRecoveryFilter, EngineConfig, EventKind,
    EventSink, EventSource, HostClock, LocalSession, LoopRegion, ManualClock, MonotonicClock,
    MotionState, PeerSession, PlaybackSettings, SequenceSnapshot, SnapshotPublisher, Step,
    StepTrack, SyncSource, TimeSignature, TimedEvent, TransportManager, BBT,
};

pub use metrum_sequencer::{SchedulerHandle, TransportEngine, TransportNotification};

#[cfg(feature = "clock")]
pub use metrum_clock::{ClockGenerator, ClockMessage, Subscription, TimerHub};

mod builder;
mod engine;
mod error;
mod handle;

pub use builder::{MetrumEngineBuilder, DEFAULT_SNAPSHOT_POOL};
pub use engine::MetrumEngine;
pub use error::{Error, Result};
pub use handle::TransportHandle;

/// Convenience prelude for common imports
pub mod prelude {
    // Main engine
    pub use crate::{MetrumEngine, MetrumEngineBuilder, TransportHandle};

    // Events and content
    pub use crate::core::{BridgeEvent, EventSource, SequenceSnapshot, Step, StepTrack, TimedEvent};

    // Transport
    pub use crate::core::{LoopRegion, MotionState, SyncSource};
    pub use crate::sequencer::TransportNotification;

    // Clock output
    #[cfg(feature = "clock")]
    pub use crate::clock::ClockMessage;
}
