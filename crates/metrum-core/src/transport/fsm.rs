//! Transport state machine.
//!
//! Owned by the audio thread. Other threads talk to it through
//! [`super::TransportManager`]'s command queue.

use super::position::{LoopRegion, MusicalPosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MotionState {
    #[default]
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl MotionState {
    pub(crate) fn from_u8(val: u8) -> Self {
        match val {
            1 => MotionState::Playing,
            2 => MotionState::Paused,
            _ => MotionState::Stopped,
        }
    }
}

/// A transport operation held until the next synchronized boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Start,
    Stop,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    Play,
    Pause,
    Resume,
    Stop,
    Seek(MusicalPosition),
    SetLoop(LoopRegion),
    SetLoopEnabled(bool),
    ClearLoop,
    /// Hold start/stop/pause/resume until the next boundary.
    SetQuantizedTransport(bool),
    /// Hold seeks until the next beat boundary.
    SetQuantizedSeek(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionResult {
    None,
    MotionChanged {
        from: MotionState,
        to: MotionState,
    },
    Pending(PendingOp),
    PendingCancelled(PendingOp),
    Seeked(MusicalPosition),
    SeekPending(MusicalPosition),
    LoopChanged(LoopRegion),
    ModeChanged,
}

pub struct TransportFSM {
    motion: MotionState,
    pending_op: Option<PendingOp>,
    pending_seek: Option<MusicalPosition>,
    loop_region: LoopRegion,
    quantize_transport: bool,
    quantize_seek: bool,
}

impl TransportFSM {
    pub fn new() -> Self {
        Self {
            motion: MotionState::Stopped,
            pending_op: None,
            pending_seek: None,
            loop_region: LoopRegion::default(),
            quantize_transport: false,
            quantize_seek: false,
        }
    }

    #[inline]
    pub fn motion(&self) -> MotionState {
        self.motion
    }

    #[inline]
    pub fn pending_op(&self) -> Option<PendingOp> {
        self.pending_op
    }

    #[inline]
    pub fn pending_seek(&self) -> Option<MusicalPosition> {
        self.pending_seek
    }

    #[inline]
    pub fn loop_region(&self) -> LoopRegion {
        self.loop_region
    }

    #[inline]
    pub fn is_quantized(&self) -> bool {
        self.quantize_transport
    }

    pub fn transition(&mut self, event: TransportEvent) -> TransitionResult {
        use TransportEvent::*;

        match event {
            Play => match (self.motion, self.pending_op) {
                // A later play cancels a pending stop or pause.
                (MotionState::Playing, Some(op @ (PendingOp::Stop | PendingOp::Pause))) => {
                    self.pending_op = None;
                    TransitionResult::PendingCancelled(op)
                }
                (MotionState::Playing, _) => TransitionResult::None,
                (MotionState::Paused, _) => self.request(PendingOp::Resume),
                (MotionState::Stopped, _) => self.request(PendingOp::Start),
            },

            Resume => match self.motion {
                MotionState::Paused => self.request(PendingOp::Resume),
                _ => TransitionResult::None,
            },

            Pause => match self.motion {
                MotionState::Playing => self.request(PendingOp::Pause),
                _ => TransitionResult::None,
            },

            Stop => match (self.motion, self.pending_op) {
                // A later stop cancels a pending start.
                (MotionState::Stopped, Some(op)) => {
                    self.pending_op = None;
                    TransitionResult::PendingCancelled(op)
                }
                (MotionState::Stopped, None) => TransitionResult::None,
                _ => self.request(PendingOp::Stop),
            },

            Seek(pos) => {
                if self.quantize_seek && self.motion == MotionState::Playing {
                    self.pending_seek = Some(pos);
                    TransitionResult::SeekPending(pos)
                } else {
                    self.pending_seek = None;
                    TransitionResult::Seeked(pos)
                }
            }

            SetLoop(region) => {
                self.loop_region = region;
                TransitionResult::LoopChanged(region)
            }

            SetLoopEnabled(enabled) => {
                self.loop_region.enabled = enabled;
                TransitionResult::LoopChanged(self.loop_region)
            }

            ClearLoop => {
                self.loop_region.enabled = false;
                TransitionResult::LoopChanged(self.loop_region)
            }

            SetQuantizedTransport(enabled) => {
                self.quantize_transport = enabled;
                if !enabled {
                    if let Some(op) = self.pending_op.take() {
                        return self.apply(op);
                    }
                }
                TransitionResult::ModeChanged
            }

            SetQuantizedSeek(enabled) => {
                self.quantize_seek = enabled;
                if !enabled {
                    if let Some(pos) = self.pending_seek.take() {
                        return TransitionResult::Seeked(pos);
                    }
                }
                TransitionResult::ModeChanged
            }
        }
    }

    /// Apply the pending operation at a synchronized boundary.
    pub fn on_transport_boundary(&mut self) -> TransitionResult {
        match self.pending_op.take() {
            Some(op) => self.apply(op),
            None => TransitionResult::None,
        }
    }

    /// Apply the pending seek at a beat boundary.
    pub fn on_beat_boundary(&mut self) -> TransitionResult {
        match self.pending_seek.take() {
            Some(pos) => TransitionResult::Seeked(pos),
            None => TransitionResult::None,
        }
    }

    /// Motion changes from a source outside the command queue (sequence end,
    /// exhausted loop, peer session stop).
    pub fn force(&mut self, to: MotionState) -> TransitionResult {
        self.pending_op = None;
        self.pending_seek = None;
        self.set_motion(to)
    }

    fn request(&mut self, op: PendingOp) -> TransitionResult {
        if self.quantize_transport {
            self.pending_op = Some(op);
            TransitionResult::Pending(op)
        } else {
            self.pending_op = None;
            self.apply(op)
        }
    }

    fn apply(&mut self, op: PendingOp) -> TransitionResult {
        let to = match (op, self.motion) {
            (PendingOp::Start, MotionState::Stopped) => MotionState::Playing,
            (PendingOp::Resume, MotionState::Paused) => MotionState::Playing,
            (PendingOp::Pause, MotionState::Playing) => MotionState::Paused,
            (PendingOp::Stop, MotionState::Playing | MotionState::Paused) => MotionState::Stopped,
            _ => return TransitionResult::None,
        };
        if to == MotionState::Stopped {
            self.pending_seek = None;
        }
        self.set_motion(to)
    }

    fn set_motion(&mut self, to: MotionState) -> TransitionResult {
        let from = self.motion;
        if from == to {
            return TransitionResult::None;
        }
        self.motion = to;
        TransitionResult::MotionChanged { from, to }
    }
}

impl Default for TransportFSM {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(from: MotionState, to: MotionState) -> TransitionResult {
        TransitionResult::MotionChanged { from, to }
    }

    #[test]
    fn test_play_pause_resume_stop() {
        let mut fsm = TransportFSM::new();

        assert_eq!(
            fsm.transition(TransportEvent::Play),
            changed(MotionState::Stopped, MotionState::Playing)
        );
        assert_eq!(fsm.transition(TransportEvent::Play), TransitionResult::None);
        assert_eq!(
            fsm.transition(TransportEvent::Pause),
            changed(MotionState::Playing, MotionState::Paused)
        );
        assert_eq!(
            fsm.transition(TransportEvent::Resume),
            changed(MotionState::Paused, MotionState::Playing)
        );
        assert_eq!(
            fsm.transition(TransportEvent::Stop),
            changed(MotionState::Playing, MotionState::Stopped)
        );
        assert_eq!(fsm.transition(TransportEvent::Stop), TransitionResult::None);
    }

    #[test]
    fn test_pause_from_stopped_is_ignored() {
        let mut fsm = TransportFSM::new();
        assert_eq!(fsm.transition(TransportEvent::Pause), TransitionResult::None);
        assert_eq!(fsm.transition(TransportEvent::Resume), TransitionResult::None);
        assert_eq!(fsm.motion(), MotionState::Stopped);
    }

    #[test]
    fn test_stop_from_paused() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::Play);
        fsm.transition(TransportEvent::Pause);
        assert_eq!(
            fsm.transition(TransportEvent::Stop),
            changed(MotionState::Paused, MotionState::Stopped)
        );
    }

    #[test]
    fn test_quantized_ops_wait_for_boundary() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::SetQuantizedTransport(true));

        assert_eq!(
            fsm.transition(TransportEvent::Play),
            TransitionResult::Pending(PendingOp::Start)
        );
        assert_eq!(fsm.motion(), MotionState::Stopped);

        assert_eq!(
            fsm.on_transport_boundary(),
            changed(MotionState::Stopped, MotionState::Playing)
        );
        assert_eq!(fsm.on_transport_boundary(), TransitionResult::None);
    }

    #[test]
    fn test_later_play_cancels_pending_stop() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::Play);
        fsm.transition(TransportEvent::SetQuantizedTransport(true));

        assert_eq!(
            fsm.transition(TransportEvent::Stop),
            TransitionResult::Pending(PendingOp::Stop)
        );
        assert_eq!(
            fsm.transition(TransportEvent::Play),
            TransitionResult::PendingCancelled(PendingOp::Stop)
        );
        assert_eq!(fsm.on_transport_boundary(), TransitionResult::None);
        assert_eq!(fsm.motion(), MotionState::Playing);
    }

    #[test]
    fn test_later_stop_cancels_pending_start() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::SetQuantizedTransport(true));
        fsm.transition(TransportEvent::Play);

        assert_eq!(
            fsm.transition(TransportEvent::Stop),
            TransitionResult::PendingCancelled(PendingOp::Start)
        );
        assert_eq!(fsm.on_transport_boundary(), TransitionResult::None);
        assert_eq!(fsm.motion(), MotionState::Stopped);
    }

    #[test]
    fn test_leaving_quantized_mode_applies_pending() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::SetQuantizedTransport(true));
        fsm.transition(TransportEvent::Play);
        assert_eq!(
            fsm.transition(TransportEvent::SetQuantizedTransport(false)),
            changed(MotionState::Stopped, MotionState::Playing)
        );
    }

    #[test]
    fn test_quantized_seek_only_while_playing() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::SetQuantizedSeek(true));

        let target = MusicalPosition::from_beats(8.0);
        assert_eq!(
            fsm.transition(TransportEvent::Seek(target)),
            TransitionResult::Seeked(target)
        );

        fsm.transition(TransportEvent::Play);
        assert_eq!(
            fsm.transition(TransportEvent::Seek(target)),
            TransitionResult::SeekPending(target)
        );
        assert_eq!(fsm.pending_seek(), Some(target));
        assert_eq!(fsm.on_beat_boundary(), TransitionResult::Seeked(target));
        assert_eq!(fsm.pending_seek(), None);
    }

    #[test]
    fn test_stop_discards_pending_seek() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::SetQuantizedSeek(true));
        fsm.transition(TransportEvent::Play);
        fsm.transition(TransportEvent::Seek(MusicalPosition::from_beats(4.0)));
        fsm.transition(TransportEvent::Stop);
        assert_eq!(fsm.pending_seek(), None);
    }

    #[test]
    fn test_loop_events() {
        let mut fsm = TransportFSM::new();
        let region = LoopRegion::new(4.0, 8.0);
        assert_eq!(
            fsm.transition(TransportEvent::SetLoop(region)),
            TransitionResult::LoopChanged(region)
        );
        fsm.transition(TransportEvent::ClearLoop);
        assert!(!fsm.loop_region().enabled);
        fsm.transition(TransportEvent::SetLoopEnabled(true));
        assert!(fsm.loop_region().enabled);
        assert_eq!(fsm.loop_region().start, 4.0);
    }

    #[test]
    fn test_force_clears_pending() {
        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::Play);
        fsm.transition(TransportEvent::SetQuantizedTransport(true));
        fsm.transition(TransportEvent::Pause);
        assert_eq!(
            fsm.force(MotionState::Stopped),
            changed(MotionState::Playing, MotionState::Stopped)
        );
        assert_eq!(fsm.pending_op(), None);
    }
}
