//! Transport manager: the thread-safe face of the transport.
//!
//! Control threads enqueue [`TransportEvent`]s; the audio thread drains them
//! into its [`super::TransportFSM`] and publishes the outcome back through
//! atomics.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use super::fsm::{MotionState, TransportEvent};
use super::position::{LoopRegion, MusicalPosition};
use super::state::{HotCounters, TransportState};
use super::sync::{SyncSource, SyncState};
use super::time_signature::{TimeSignature, BBT};
use crate::config::validate_tempo;
use crate::error::{Error, Result};
use crate::lockfree::{AtomicCounter, AtomicDouble, AtomicFlag, AtomicFloat};

pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

pub struct TransportManager {
    command_tx: Sender<TransportEvent>,
    command_rx: Receiver<TransportEvent>,
    dropped_commands: AtomicCounter,

    state: Arc<TransportState>,
    hot: Arc<HotCounters>,
    sync: SyncState,

    /// User-set tempo for the internal source.
    internal_tempo: AtomicFloat,
    motion_state: AtomicU8,

    loop_enabled: AtomicFlag,
    loop_start: AtomicDouble,
    loop_end: AtomicDouble,
    loop_max_iterations: AtomicU32,
    loop_iteration: AtomicU32,
}

impl TransportManager {
    pub fn new(
        state: Arc<TransportState>,
        hot: Arc<HotCounters>,
        sync_source: SyncSource,
        command_capacity: usize,
    ) -> Self {
        // Array-backed: neither side allocates after construction.
        let (command_tx, command_rx) = bounded(command_capacity.max(1));
        let loop_region = LoopRegion::default();
        let tempo = state.tempo();

        Self {
            command_tx,
            command_rx,
            dropped_commands: AtomicCounter::new(),
            state,
            hot,
            sync: SyncState::new(sync_source),
            internal_tempo: AtomicFloat::new(tempo),
            motion_state: AtomicU8::new(MotionState::Stopped as u8),
            loop_enabled: AtomicFlag::new(loop_region.enabled),
            loop_start: AtomicDouble::new(loop_region.start),
            loop_end: AtomicDouble::new(loop_region.end),
            loop_max_iterations: AtomicU32::new(loop_region.max_iterations),
            loop_iteration: AtomicU32::new(0),
        }
    }

    /// Enqueue a command. Never blocks; returns `false` when the queue is full.
    pub fn send_command(&self, event: TransportEvent) -> bool {
        match self.command_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_commands.increment();
                false
            }
        }
    }

    /// Next pending command (audio thread).
    #[inline]
    pub fn poll_command(&self) -> Option<TransportEvent> {
        self.command_rx.try_recv().ok()
    }

    pub fn dropped_commands(&self) -> u64 {
        self.dropped_commands.get()
    }

    pub fn play(&self) -> bool {
        self.send_command(TransportEvent::Play)
    }

    pub fn pause(&self) -> bool {
        self.send_command(TransportEvent::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send_command(TransportEvent::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send_command(TransportEvent::Stop)
    }

    pub fn seek(&self, beat: f64) -> Result<bool> {
        if !(beat >= 0.0 && beat.is_finite()) {
            return Err(Error::InvalidBeat(beat));
        }
        Ok(self.send_command(TransportEvent::Seek(MusicalPosition::from_beats(beat))))
    }

    pub fn set_loop(&self, region: LoopRegion) -> Result<bool> {
        region.validate()?;
        self.publish_loop(region);
        Ok(self.send_command(TransportEvent::SetLoop(region)))
    }

    pub fn set_loop_enabled(&self, enabled: bool) -> bool {
        // Set atomic immediately so readers see the change right away,
        // then sync the FSM on the next audio callback.
        self.loop_enabled.set(enabled);
        self.send_command(TransportEvent::SetLoopEnabled(enabled))
    }

    pub fn clear_loop(&self) -> bool {
        self.loop_enabled.set(false);
        self.send_command(TransportEvent::ClearLoop)
    }

    pub fn set_quantized_seek(&self, enabled: bool) -> bool {
        self.send_command(TransportEvent::SetQuantizedSeek(enabled))
    }

    pub fn set_quantized_transport(&self, enabled: bool) -> bool {
        self.send_command(TransportEvent::SetQuantizedTransport(enabled))
    }

    pub fn set_tempo(&self, bpm: f32) -> Result<()> {
        validate_tempo(bpm)?;
        self.internal_tempo.set(bpm);
        Ok(())
    }

    /// User-set tempo for the internal source.
    #[inline]
    pub fn internal_tempo(&self) -> f32 {
        self.internal_tempo.get()
    }

    /// Tempo currently driving position, whichever source provides it.
    #[inline]
    pub fn effective_tempo(&self) -> f32 {
        self.state.tempo()
    }

    pub fn set_time_signature(&self, numerator: u32, denominator: u32) -> Result<()> {
        let sig = TimeSignature::try_new(numerator, denominator)?;
        self.state.set_time_signature(sig);
        Ok(())
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.state.time_signature()
    }

    pub fn set_global_transpose(&self, semitones: i32) {
        self.state.set_global_transpose(semitones);
    }

    pub fn set_sync_source(&self, source: SyncSource) {
        self.sync.set_source(source);
    }

    #[inline]
    pub fn sync_source(&self) -> SyncSource {
        self.sync.source()
    }

    #[inline]
    pub fn motion_state(&self) -> MotionState {
        MotionState::from_u8(self.motion_state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn current_beat(&self) -> f64 {
        self.hot.current_beat()
    }

    pub fn current_bbt(&self) -> BBT {
        BBT::from_beats(
            self.hot.current_beat(),
            self.state.time_signature(),
            self.state.ticks_per_quarter(),
        )
    }

    pub fn loop_region(&self) -> LoopRegion {
        LoopRegion {
            start: self.loop_start.get(),
            end: self.loop_end.get(),
            enabled: self.loop_enabled.get(),
            max_iterations: self.loop_max_iterations.load(Ordering::Acquire),
        }
    }

    pub fn loop_iteration(&self) -> u32 {
        self.loop_iteration.load(Ordering::Acquire)
    }

    pub fn state(&self) -> &Arc<TransportState> {
        &self.state
    }

    pub fn hot_counters(&self) -> &Arc<HotCounters> {
        &self.hot
    }

    pub fn publish_motion(&self, motion: MotionState) {
        self.motion_state.store(motion as u8, Ordering::Release);
    }

    pub fn publish_loop(&self, region: LoopRegion) {
        self.loop_start.set(region.start);
        self.loop_end.set(region.end);
        self.loop_max_iterations
            .store(region.max_iterations, Ordering::Release);
        self.loop_enabled.set(region.enabled);
    }

    pub fn publish_loop_iteration(&self, iteration: u32) {
        self.loop_iteration.store(iteration, Ordering::Release);
    }
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new(
            Arc::new(TransportState::default()),
            Arc::new(HotCounters::default()),
            SyncSource::Internal,
            DEFAULT_COMMAND_CAPACITY,
        )
    }
}
