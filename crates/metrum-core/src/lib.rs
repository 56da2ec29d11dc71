//! Real-time timing core: transport state, clock recovery, lock-free channels.
//!
//! Everything that crosses into or out of the audio thread lives here:
//!
//! - [`ring`]: fixed-capacity event channels (SPSC pipe, lossy multi-producer
//!   broadcast, wake-on-write drain queue)
//! - [`ClockRecoveryFilter`]: external pulse timing to a stable tempo
//! - [`TransportManager`] / [`TransportFSM`]: play/pause/stop/seek/loop with
//!   quantized pending operations
//! - [`TransportState`] / [`HotCounters`]: position record shared by atomics
//! - [`SnapshotPublisher`]: atomic publication of loaded content
//! - [`ChannelShadow`]: wait-free per-channel note and control state
//!
//! Nothing in the audio-thread paths allocates, blocks or logs.

pub mod config;
pub mod error;
pub mod event;
pub mod lockfree;
pub mod recovery;
pub mod ring;
pub mod shadow;
pub mod snapshot;
pub mod time;
pub mod transport;

pub use config::{ClockConfig, EngineConfig, PlaybackParams, PlaybackSettings};
pub use error::{Error, Result};
pub use event::{BridgeEvent, EventKind, EventSink, EventSource};
pub use lockfree::{AtomicCounter, AtomicDouble, AtomicFlag, AtomicFloat};
pub use recovery::ClockRecoveryFilter;
pub use shadow::{ChannelShadow, ShadowSink};
pub use snapshot::{
    DeferredDeleter, SequenceSnapshot, SnapshotPublisher, SnapshotReader, Step, StepTrack,
    TimedEvent, MAX_TRACKS,
};
pub use time::{HostClock, ManualClock, MonotonicClock};
pub use transport::{
    ClockEstimate, HotCounters, LocalSession, LoopRegion, MotionState, MusicalPosition,
    PeerSession, PendingOp, SharedClockEstimate, SyncSource, SyncStatus, TimeSignature,
    TransitionResult, TransportEvent, TransportFSM, TransportManager, TransportState, BBT,
};
