pub(crate) mod fsm;
pub(crate) mod manager;
pub mod peer;
pub(crate) mod position;
pub(crate) mod state;
pub mod sync;
pub(crate) mod time_signature;

pub use fsm::{MotionState, PendingOp, TransitionResult, TransportEvent, TransportFSM};
pub use manager::{TransportManager, DEFAULT_COMMAND_CAPACITY};
pub use peer::{LocalSession, PeerSession};
pub use position::{LoopRegion, MusicalPosition};
pub use state::{HotCounters, TransportState, DEFAULT_TICKS_PER_QUARTER};
pub use sync::{ClockEstimate, SharedClockEstimate, SyncSource, SyncState, SyncStatus};
pub use time_signature::{TimeSignature, BBT};
