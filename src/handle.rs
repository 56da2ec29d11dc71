//! Fluent API handle for transport and playback control.

use metrum_core::{
    LoopRegion, MotionState, PlaybackSettings, SyncSource, TimeSignature, TransportManager, BBT,
};
use std::sync::Arc;
use tracing::warn;

/// Fluent API handle for transport control.
///
/// Created via `engine.transport()`. Commands are queued for the audio
/// thread and take effect on its next block; getters read the last state it
/// published.
///
/// # Example
/// ```ignore
/// engine.transport()
///     .tempo(128.0)
///     .loop_range(0.0, 16.0)
///     .swing(0.3)
///     .play();
/// ```
#[derive(Clone)]
pub struct TransportHandle {
    transport: Arc<TransportManager>,
    settings: Arc<PlaybackSettings>,
}

impl TransportHandle {
    pub(crate) fn new(transport: Arc<TransportManager>, settings: Arc<PlaybackSettings>) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Set the internal tempo in BPM. Out-of-range values are ignored.
    pub fn tempo(self, bpm: f32) -> Self {
        if let Err(e) = self.transport.set_tempo(bpm) {
            warn!(error = %e, "tempo rejected");
        }
        self
    }

    /// Tempo set for the internal source.
    pub fn get_tempo(&self) -> f32 {
        self.transport.internal_tempo()
    }

    /// Tempo currently driving position, whichever source provides it.
    pub fn effective_tempo(&self) -> f32 {
        self.transport.effective_tempo()
    }

    pub fn time_signature(self, numerator: u32, denominator: u32) -> Self {
        if let Err(e) = self.transport.set_time_signature(numerator, denominator) {
            warn!(error = %e, "time signature rejected");
        }
        self
    }

    pub fn get_time_signature(&self) -> TimeSignature {
        self.transport.time_signature()
    }

    pub fn sync_source(self, source: SyncSource) -> Self {
        self.transport.set_sync_source(source);
        self
    }

    pub fn get_sync_source(&self) -> SyncSource {
        self.transport.sync_source()
    }

    pub fn play(self) -> Self {
        self.transport.play();
        self
    }

    pub fn pause(self) -> Self {
        self.transport.pause();
        self
    }

    pub fn resume(self) -> Self {
        self.transport.resume();
        self
    }

    /// Stop and return to the start. Sounding notes are released.
    pub fn stop(self) -> Self {
        self.transport.stop();
        self
    }

    /// Seek to position in beats. Negative or non-finite positions are
    /// ignored.
    pub fn seek(self, beats: f64) -> Self {
        if let Err(e) = self.transport.seek(beats) {
            warn!(error = %e, "seek rejected");
        }
        self
    }

    /// Loop between two beat positions and enable looping.
    pub fn loop_range(self, start: f64, end: f64) -> Self {
        self.set_loop(LoopRegion::new(start, end))
    }

    /// Loop a fixed number of passes, then play on past the loop end.
    pub fn loop_range_times(self, start: f64, end: f64, passes: u32) -> Self {
        self.set_loop(LoopRegion::new(start, end).with_max_iterations(passes))
    }

    fn set_loop(self, region: LoopRegion) -> Self {
        if let Err(e) = self.transport.set_loop(region) {
            warn!(error = %e, "loop region rejected");
        }
        self
    }

    pub fn enable_loop(self) -> Self {
        self.transport.set_loop_enabled(true);
        self
    }

    pub fn disable_loop(self) -> Self {
        self.transport.set_loop_enabled(false);
        self
    }

    pub fn clear_loop(self) -> Self {
        self.transport.clear_loop();
        self
    }

    pub fn get_loop_region(&self) -> LoopRegion {
        self.transport.loop_region()
    }

    /// Hold seeks until the next beat boundary while playing.
    pub fn quantized_seek(self, enabled: bool) -> Self {
        self.settings.set_quantized_seek(enabled);
        self
    }

    /// Under peer sync, hold start/stop/pause/resume until the next quantum.
    pub fn quantized_transport(self, enabled: bool) -> Self {
        self.transport.set_quantized_transport(enabled);
        self
    }

    /// Swing amount for off-beat steps, 0..=1.
    pub fn swing(self, amount: f32) -> Self {
        self.settings.set_swing(amount);
        self
    }

    /// Velocity and timing humanization. `timing` is the maximum delay in
    /// beats.
    pub fn humanize(self, velocity: f32, timing: f32) -> Self {
        self.settings.set_humanize_velocity(velocity);
        self.settings.set_humanize_timing(timing);
        self
    }

    /// Engage a roll at `division` notes per whole note. 0 releases it.
    pub fn roll(self, division: u32) -> Self {
        self.settings.set_roll_division(division);
        self
    }

    pub fn release_roll(self) -> Self {
        self.settings.set_roll_division(0);
        self
    }

    pub fn transpose(self, semitones: i32) -> Self {
        self.transport.set_global_transpose(semitones);
        self
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn motion(&self) -> MotionState {
        self.transport.motion_state()
    }

    pub fn current_beat(&self) -> f64 {
        self.transport.current_beat()
    }

    pub fn current_bbt(&self) -> BBT {
        self.transport.current_bbt()
    }

    pub fn loop_iteration(&self) -> u32 {
        self.transport.loop_iteration()
    }

    /// Commands lost because the queue to the audio thread was full.
    pub fn dropped_commands(&self) -> u64 {
        self.transport.dropped_commands()
    }
}
