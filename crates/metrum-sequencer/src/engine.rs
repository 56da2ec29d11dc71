//! Per-callback transport engine.
//!
//! [`TransportEngine::process_audio_block`] runs once per audio buffer on the
//! audio thread:
//!
//! 1. pick up a newly published snapshot
//! 2. advance the authoritative timeline (internal tempo, recovered external
//!    clock or peer session)
//! 3. drain transport commands into the state machine, holding quantized
//!    operations until the next quantum boundary
//! 4. while playing, walk the block in segments split at loop end, sequence
//!    end and pending-seek beat boundaries, and for each segment run the
//!    deferred scheduler, the step sequencer and file playback
//! 5. publish position and motion back to the shared atomics
//!
//! Nothing here allocates, locks or logs. Outcomes the owner must react to
//! go out as [`TransportNotification`]s through an SPSC pipe.

use crate::error::Result;
use crate::file;
use crate::scheduler::{DeferredScheduler, SchedulerHandle};
use crate::step::{RollWindow, StepSequencer};
use metrum_core::ring::{
    broadcast_buffer, event_pipe, BroadcastReceiver, BroadcastSender, PipeConsumer, PipeProducer,
};
use metrum_core::{
    BridgeEvent, ChannelShadow, EngineConfig, HostClock, MotionState, MusicalPosition,
    PeerSession, PendingOp, PlaybackParams, PlaybackSettings, SequenceSnapshot, ShadowSink,
    SharedClockEstimate, SnapshotReader, SyncSource, TransitionResult, TransportEvent,
    TransportFSM, TransportManager,
};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on segments rendered per block. Only reachable with a loop
/// far shorter than the block.
const MAX_SEGMENTS_PER_BLOCK: usize = 64;

/// Something the owner should know about, produced on the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportNotification {
    Started { beat: f64 },
    Paused { beat: f64 },
    Resumed { beat: f64 },
    Stopped,
    Seeked { beat: f64 },
    /// Playback jumped back to the loop start. `iteration` counts completed
    /// passes.
    LoopWrapped { iteration: u32 },
    /// The loop reached its iteration limit and playback continued past it.
    LoopExhausted { iterations: u32 },
    SequenceEnded { beat: f64 },
    PendingScheduled(PendingOp),
    PendingCancelled(PendingOp),
}

/// Shared collaborators the engine reads from or publishes to.
pub struct EngineContext {
    pub manager: Arc<TransportManager>,
    pub settings: Arc<PlaybackSettings>,
    pub clock_estimate: Arc<SharedClockEstimate>,
    pub shadow: Arc<ChannelShadow>,
    pub snapshots: SnapshotReader,
    pub host_clock: Arc<dyn HostClock>,
    pub peer: Option<Arc<dyn PeerSession>>,
}

/// The non-audio ends of the engine's channels.
pub struct EngineEndpoints {
    pub scheduler: SchedulerHandle,
    pub events: BroadcastReceiver<BridgeEvent>,
    pub notifications: PipeConsumer<TransportNotification>,
}

#[derive(Clone, Copy)]
enum Boundary {
    LoopEnd,
    SequenceEnd,
    PendingSeek,
}

pub struct TransportEngine {
    ctx: EngineContext,
    fsm: TransportFSM,
    scheduler: DeferredScheduler,
    sequencer: StepSequencer,
    output: BroadcastSender<BridgeEvent>,
    notifications: PipeProducer<TransportNotification>,

    position: f64,
    /// Free-running beat timeline for the internal and external sources.
    /// Quantum boundaries are measured against it.
    timeline: f64,
    /// Peer-timeline beat the last block ended on. Each block starts here,
    /// so position stays a fixed offset from the session's beat no matter
    /// how the host clock and the sample clock disagree.
    peer_cursor: Option<f64>,
    now_us: u64,

    loop_iteration: u32,
    loop_done: bool,
    roll: Option<RollWindow>,
    snapshot_id: u64,

    quantum: f64,
    quantized_peer_transport: bool,
    peer_quantize_active: bool,
    quantized_seek: bool,
    peer_was_playing: bool,
}

impl TransportEngine {
    pub fn new(config: &EngineConfig, ctx: EngineContext) -> Result<(Self, EngineEndpoints)> {
        config.validate()?;

        let (scheduler, scheduler_handle) =
            DeferredScheduler::new(config.scheduler_pool_size, config.command_capacity)?;
        let (output, events) = broadcast_buffer(config.event_capacity);
        let (notifications, notification_rx) = event_pipe(config.notification_capacity);

        let mut fsm = TransportFSM::new();
        fsm.transition(TransportEvent::SetLoop(config.loop_region));
        fsm.transition(TransportEvent::SetQuantizedSeek(config.quantized_seek));
        ctx.manager.publish_loop(config.loop_region);
        ctx.manager.publish_motion(MotionState::Stopped);

        debug!(
            pool = config.scheduler_pool_size,
            events = config.event_capacity,
            source = ?ctx.manager.sync_source(),
            "transport engine created"
        );

        let engine = Self {
            fsm,
            scheduler,
            sequencer: StepSequencer::new(config.random_seed),
            output,
            notifications,
            position: 0.0,
            timeline: 0.0,
            peer_cursor: None,
            now_us: 0,
            loop_iteration: 0,
            loop_done: false,
            roll: None,
            snapshot_id: 0,
            quantum: config.peer_quantum,
            quantized_peer_transport: config.quantized_peer_transport,
            peer_quantize_active: false,
            quantized_seek: config.quantized_seek,
            peer_was_playing: false,
            ctx,
        };
        let endpoints = EngineEndpoints {
            scheduler: scheduler_handle,
            events,
            notifications: notification_rx,
        };
        Ok((engine, endpoints))
    }

    /// Render one audio buffer's worth of musical time.
    pub fn process_audio_block(&mut self, num_samples: usize, sample_rate: f64) {
        if num_samples == 0 || !(sample_rate > 0.0) {
            return;
        }

        let snapshot = self.ctx.snapshots.load();
        if snapshot.id != self.snapshot_id {
            self.snapshot_id = snapshot.id;
            self.ctx
                .manager
                .state()
                .set_ticks_per_quarter(snapshot.ticks_per_quarter);
            self.sequencer.reset_rolls();
        }
        let params = self.ctx.settings.load();

        let block_seconds = num_samples as f64 / sample_rate;
        self.now_us = self.ctx.host_clock.now_us();
        let (src_start, src_end, peer_playing) = self.advance_source(block_seconds);

        self.sync_modes(peer_playing.is_some());
        if let Some(playing) = peer_playing {
            if playing != self.peer_was_playing {
                self.peer_was_playing = playing;
                let event = if playing {
                    TransportEvent::Play
                } else {
                    TransportEvent::Stop
                };
                let result = self.fsm.transition(event);
                self.apply_transition(result);
            }
        }

        while let Some(event) = self.ctx.manager.poll_command() {
            let result = self.fsm.transition(event);
            self.apply_transition(result);
        }

        self.update_roll(&params);

        let boundary = (src_start / self.quantum).ceil() * self.quantum;
        if self.fsm.pending_op().is_some() && self.fsm.is_quantized() && boundary < src_end {
            self.run_span(&snapshot, &params, boundary - src_start);
            let result = self.fsm.on_transport_boundary();
            self.apply_transition(result);
            self.run_span(&snapshot, &params, src_end - boundary);
        } else {
            self.run_span(&snapshot, &params, src_end - src_start);
        }

        let tpq = self.ctx.manager.state().ticks_per_quarter();
        self.ctx.manager.hot_counters().publish_position(self.position, tpq);
        self.ctx.manager.publish_motion(self.fsm.motion());
        self.ctx.manager.publish_loop_iteration(self.loop_iteration);
    }

    /// Advance whichever source is authoritative. Returns the span it covers
    /// this block and, under peer sync, whether the session is playing.
    fn advance_source(&mut self, block_seconds: f64) -> (f64, f64, Option<bool>) {
        let state = self.ctx.manager.state();
        let source = self.ctx.manager.sync_source();

        if let (SyncSource::PeerSync, Some(peer)) = (source, self.ctx.peer.as_deref()) {
            let block_us = (block_seconds * 1_000_000.0) as u64;
            let start = self
                .peer_cursor
                .unwrap_or_else(|| peer.beat_at_time(self.now_us, self.quantum));
            let end = peer
                .beat_at_time(self.now_us + block_us, self.quantum)
                .max(start);
            self.peer_cursor = Some(end);
            state.set_tempo(peer.tempo() as f32);
            return (start, end, Some(peer.is_playing()));
        }
        self.peer_cursor = None;

        let tempo = match source {
            SyncSource::ExternalClock => self.ctx.clock_estimate.stable_tempo(),
            _ => self.ctx.manager.internal_tempo() as f64,
        };
        state.set_tempo(tempo as f32);

        let start = self.timeline;
        self.timeline += block_seconds * tempo / 60.0;
        (start, self.timeline, None)
    }

    /// Follow quantization settings that live outside the command queue.
    fn sync_modes(&mut self, peer_active: bool) {
        let quantize = self.quantized_peer_transport && peer_active;
        if quantize != self.peer_quantize_active {
            self.peer_quantize_active = quantize;
            let result = self
                .fsm
                .transition(TransportEvent::SetQuantizedTransport(quantize));
            self.apply_transition(result);
        }

        let quantized_seek = self.ctx.settings.quantized_seek();
        if quantized_seek != self.quantized_seek {
            self.quantized_seek = quantized_seek;
            let result = self
                .fsm
                .transition(TransportEvent::SetQuantizedSeek(quantized_seek));
            self.apply_transition(result);
        }
    }

    fn update_roll(&mut self, params: &PlaybackParams) {
        let hot = self.ctx.manager.hot_counters();
        let tpq = self.ctx.manager.state().ticks_per_quarter() as f64;

        match params.roll_cycle_beats() {
            Some(cycle) if self.roll.map_or(true, |r| r.cycle != cycle) => {
                let anchor = (self.position / cycle).floor() * cycle;
                self.roll = Some(RollWindow { anchor, cycle });
                self.sequencer.reset_rolls();
                hot.publish_roll((cycle * tpq) as u32, (anchor * tpq) as u64);
            }
            Some(_) => {}
            None => {
                if self.roll.take().is_some() {
                    hot.publish_roll(0, 0);
                }
            }
        }
    }

    fn run_span(&mut self, snapshot: &SequenceSnapshot, params: &PlaybackParams, advance: f64) {
        if self.fsm.motion() == MotionState::Playing {
            self.play_segments(snapshot, params, advance.max(0.0));
        } else {
            let mut sink = ShadowSink::new(&mut self.output, &self.ctx.shadow);
            self.scheduler.drain_commands(&mut sink);
        }
    }

    fn play_segments(
        &mut self,
        snapshot: &SequenceSnapshot,
        params: &PlaybackParams,
        advance: f64,
    ) {
        let mut remaining = advance;

        for _ in 0..MAX_SEGMENTS_PER_BLOCK {
            let start = self.position;
            let mut end = start + remaining;
            let mut boundary = None;

            let region = self.fsm.loop_region();
            if region.enabled && !self.loop_done && start < region.end && region.end <= end {
                end = region.end;
                boundary = Some(Boundary::LoopEnd);
            }
            if let Some(length) = snapshot.length_beats {
                if start < length && (length < end || (boundary.is_none() && length <= end)) {
                    end = length;
                    boundary = Some(Boundary::SequenceEnd);
                }
            }
            if self.fsm.pending_seek().is_some() {
                let beat = start.ceil();
                if beat < end || (boundary.is_none() && beat <= end) {
                    end = beat;
                    boundary = Some(Boundary::PendingSeek);
                }
            }

            if end > start {
                self.play_span(snapshot, params, start, end);
            }
            remaining -= end - start;
            self.position = end;

            match boundary {
                None => break,
                Some(Boundary::LoopEnd) => self.wrap_loop(),
                Some(Boundary::SequenceEnd) => {
                    self.notify(TransportNotification::SequenceEnded { beat: end });
                    let result = self.fsm.force(MotionState::Stopped);
                    self.apply_transition(result);
                    break;
                }
                Some(Boundary::PendingSeek) => {
                    let result = self.fsm.on_beat_boundary();
                    self.apply_transition(result);
                }
            }
            if self.fsm.motion() != MotionState::Playing {
                break;
            }
        }
    }

    fn play_span(
        &mut self,
        snapshot: &SequenceSnapshot,
        params: &PlaybackParams,
        start: f64,
        end: f64,
    ) {
        let transpose = self.ctx.manager.state().global_transpose();
        let mut sink = ShadowSink::new(&mut self.output, &self.ctx.shadow);

        self.scheduler.process_span(&mut sink, start, end);
        self.sequencer.evaluate(
            snapshot,
            start,
            end,
            params,
            self.roll,
            transpose,
            &mut self.scheduler,
            &mut sink,
        );
        file::play_span(snapshot, start, end, transpose, &mut sink);
        // Anything the sequencer scheduled inside this span (short gates).
        self.scheduler.fire_due(&mut sink, end);
    }

    fn wrap_loop(&mut self) {
        let region = self.fsm.loop_region();
        self.loop_iteration = self.loop_iteration.saturating_add(1);

        if region.max_iterations > 0 && self.loop_iteration >= region.max_iterations {
            self.loop_done = true;
            self.notify(TransportNotification::LoopExhausted {
                iterations: self.loop_iteration,
            });
            return;
        }

        self.scheduler.wrap(region.end, region.start);
        self.sequencer.reset_rolls();
        self.position = region.start;
        self.output.push(BridgeEvent::position_jump(region.start));
        self.notify(TransportNotification::LoopWrapped {
            iteration: self.loop_iteration,
        });
    }

    fn apply_transition(&mut self, result: TransitionResult) {
        match result {
            TransitionResult::None | TransitionResult::ModeChanged => {}
            TransitionResult::MotionChanged { from, to } => self.on_motion(from, to),
            TransitionResult::Pending(op) => {
                self.notify(TransportNotification::PendingScheduled(op));
            }
            TransitionResult::PendingCancelled(op) => {
                self.notify(TransportNotification::PendingCancelled(op));
            }
            TransitionResult::Seeked(pos) => self.seek_to(pos),
            TransitionResult::SeekPending(_) => {}
            TransitionResult::LoopChanged(region) => {
                self.ctx.manager.publish_loop(region);
                self.loop_iteration = 0;
                self.loop_done = false;
            }
        }
    }

    fn on_motion(&mut self, from: MotionState, to: MotionState) {
        let state = Arc::clone(self.ctx.manager.state());
        let tpq = state.ticks_per_quarter();

        match (from, to) {
            (MotionState::Stopped, MotionState::Playing) => {
                self.scheduler.clear_local();
                self.scheduler.sync_position(self.position);
                self.loop_iteration = 0;
                self.loop_done = false;
                state.set_playing();
                if let Some(peer) = self.active_peer() {
                    peer.request_start(self.now_us);
                }
                self.notify(TransportNotification::Started {
                    beat: self.position,
                });
            }
            (MotionState::Paused, MotionState::Playing) => {
                self.scheduler.sync_position(self.position);
                state.set_playing();
                self.notify(TransportNotification::Resumed {
                    beat: self.position,
                });
            }
            (MotionState::Playing, MotionState::Paused) => {
                let mut sink = ShadowSink::new(&mut self.output, &self.ctx.shadow);
                self.scheduler.flush_note_offs(&mut sink);
                state.set_paused(MusicalPosition::from_beats(self.position).to_ticks(tpq));
                self.notify(TransportNotification::Paused {
                    beat: self.position,
                });
            }
            (_, MotionState::Stopped) => {
                if let Some(peer) = self.active_peer() {
                    peer.request_stop(self.now_us);
                    let mut sink = ShadowSink::new(&mut self.output, &self.ctx.shadow);
                    self.scheduler.flush_note_offs(&mut sink);
                    self.scheduler.clear_local();
                } else {
                    let mut sink = ShadowSink::new(&mut self.output, &self.ctx.shadow);
                    self.scheduler.all_notes_off_local(&mut sink);
                }
                self.position = 0.0;
                self.scheduler.sync_position(0.0);
                self.loop_iteration = 0;
                self.loop_done = false;
                self.sequencer.reset_rolls();
                state.set_stopped();
                self.notify(TransportNotification::Stopped);
            }
            _ => {}
        }
    }

    fn seek_to(&mut self, pos: MusicalPosition) {
        let beat = pos.beats.max(0.0);
        {
            let mut sink = ShadowSink::new(&mut self.output, &self.ctx.shadow);
            self.scheduler.flush_note_offs(&mut sink);
        }
        self.position = beat;
        self.scheduler.sync_position(beat);
        self.sequencer.reset_rolls();
        self.output.push(BridgeEvent::position_jump(beat));
        self.notify(TransportNotification::Seeked { beat });
    }

    /// The peer session, when it is the authoritative source.
    fn active_peer(&self) -> Option<Arc<dyn PeerSession>> {
        match self.ctx.manager.sync_source() {
            SyncSource::PeerSync => self.ctx.peer.clone(),
            _ => None,
        }
    }

    #[inline]
    fn notify(&mut self, notification: TransportNotification) {
        self.notifications.push(notification);
    }

    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    #[inline]
    pub fn motion(&self) -> MotionState {
        self.fsm.motion()
    }

    #[inline]
    pub fn loop_iteration(&self) -> u32 {
        self.loop_iteration
    }

    pub fn pending_op(&self) -> Option<PendingOp> {
        self.fsm.pending_op()
    }

    pub fn pending_seek(&self) -> Option<f64> {
        self.fsm.pending_seek().map(|pos| pos.beats)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Schedule requests lost to a full slot pool.
    pub fn pool_exhausted_count(&self) -> u64 {
        self.scheduler.pool_exhausted_count()
    }

    pub fn dropped_notifications(&self) -> u64 {
        self.notifications.dropped_count()
    }
}
