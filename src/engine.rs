//! MetrumEngine that owns and wires every timing subsystem

use crate::handle::TransportHandle;
use crate::Result;
use metrum_core::ring::{BroadcastReceiver, PipeConsumer};
use metrum_core::{
    BridgeEvent, ChannelShadow, ClockEstimate, ClockRecoveryFilter, EngineConfig,
    PlaybackSettings, SequenceSnapshot, SharedClockEstimate, SnapshotPublisher, TransportManager,
};
use metrum_sequencer::{SchedulerHandle, TransportEngine, TransportNotification};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "clock")]
use metrum_clock::{ClockGenerator, ClockMessage, TimerHub};
#[cfg(feature = "clock")]
use metrum_core::ring::DrainConsumer;

/// Owner of the timing bridge.
///
/// Everything is built by [`crate::MetrumEngineBuilder`] and lives here with
/// an explicit lifetime. The audio-thread half, [`TransportEngine`], is
/// handed out once via [`MetrumEngine::take_processor`] and driven by the
/// host's audio callback; the rest of this type is for control, loader and
/// UI threads.
///
/// # Example
///
/// ```ignore
/// use metrum::prelude::*;
///
/// let mut engine = MetrumEngine::builder()
///     .sample_rate(48_000.0)
///     .tempo(120.0)
///     .build()?;
///
/// let mut processor = engine.take_processor().unwrap();
/// // In the audio callback:
/// processor.process_audio_block(512, 48_000.0);
///
/// engine.transport().loop_range(0.0, 8.0).play();
/// ```
pub struct MetrumEngine {
    pub(crate) config: EngineConfig,
    pub(crate) manager: Arc<TransportManager>,
    pub(crate) settings: Arc<PlaybackSettings>,
    pub(crate) estimate: Arc<SharedClockEstimate>,
    pub(crate) shadow: Arc<ChannelShadow>,
    pub(crate) publisher: SnapshotPublisher,

    /// Fed from the pulse input thread.
    pub(crate) recovery: Mutex<ClockRecoveryFilter>,

    pub(crate) processor: Option<TransportEngine>,
    pub(crate) scheduler: SchedulerHandle,
    pub(crate) events: Option<BroadcastReceiver<BridgeEvent>>,
    pub(crate) notifications: Option<PipeConsumer<TransportNotification>>,

    #[cfg(feature = "clock")]
    pub(crate) clock: Option<ClockGenerator>,
    #[cfg(feature = "clock")]
    pub(crate) clock_output: Option<DrainConsumer<ClockMessage>>,
    #[cfg(feature = "clock")]
    pub(crate) timer: Option<TimerHub>,
}

impl MetrumEngine {
    pub fn builder() -> crate::MetrumEngineBuilder {
        crate::MetrumEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    /// Get fluent transport API handle.
    ///
    /// # Example
    /// ```ignore
    /// engine.transport()
    ///     .tempo(128.0)
    ///     .loop_range(0.0, 16.0)
    ///     .play();
    /// ```
    pub fn transport(&self) -> TransportHandle {
        TransportHandle::new(Arc::clone(&self.manager), Arc::clone(&self.settings))
    }

    /// Get the transport manager (advanced use - prefer `transport()` for fluent API).
    pub fn transport_manager(&self) -> &Arc<TransportManager> {
        &self.manager
    }

    pub fn playback_settings(&self) -> &Arc<PlaybackSettings> {
        &self.settings
    }

    /// Hand the audio-thread half to the caller. Returns `None` after the
    /// first call.
    pub fn take_processor(&mut self) -> Option<TransportEngine> {
        self.processor.take()
    }

    // =========================================================================
    // Deferred events
    // =========================================================================

    /// Emit `event` when playback reaches `beat`. Returns `false` if the
    /// command queue is full or the record is out of range.
    pub fn schedule_event(&mut self, event: BridgeEvent, beat: f64) -> bool {
        self.scheduler.schedule_event(event, beat)
    }

    /// Forget every pending deferred event.
    pub fn clear_scheduled(&mut self) -> bool {
        self.scheduler.clear()
    }

    /// Release every sounding note and forget pending events.
    pub fn all_notes_off(&mut self) -> bool {
        self.scheduler.all_notes_off()
    }

    pub fn scheduler(&mut self) -> &mut SchedulerHandle {
        &mut self.scheduler
    }

    // =========================================================================
    // Output channels
    // =========================================================================

    /// Take the receiving end of the event stream. Returns `None` after the
    /// first call.
    pub fn take_events(&mut self) -> Option<BroadcastReceiver<BridgeEvent>> {
        self.events.take()
    }

    /// Next transport notification, unless the queue has been taken.
    pub fn poll_notification(&mut self) -> Option<TransportNotification> {
        self.notifications.as_mut()?.pop()
    }

    pub fn take_notifications(&mut self) -> Option<PipeConsumer<TransportNotification>> {
        self.notifications.take()
    }

    // =========================================================================
    // Sequence content
    // =========================================================================

    /// Swap in new content. The audio thread picks it up on its next block.
    pub fn publish_sequence(&self, snapshot: SequenceSnapshot) -> Result<u64> {
        Ok(self.publisher.publish(snapshot)?)
    }

    /// A cleared, retired snapshot whose allocations can be refilled.
    pub fn reclaim_sequence(&self) -> Option<SequenceSnapshot> {
        self.publisher.reclaim()
    }

    pub fn current_sequence(&self) -> Arc<SequenceSnapshot> {
        self.publisher.current()
    }

    pub fn snapshot_publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    // =========================================================================
    // External clock
    // =========================================================================

    /// Feed one external clock pulse (host µs). Returns `true` when the
    /// recovered clock gained or lost lock.
    pub fn on_clock_pulse(&self, timestamp_us: u64) -> bool {
        let changed = self.recovery.lock().on_pulse(timestamp_us);
        if changed {
            info!(
                locked = self.estimate.is_locked(),
                tempo = self.estimate.stable_tempo(),
                "external clock lock changed"
            );
        }
        changed
    }

    /// Unlock if no pulse has arrived for a dropout window. Call
    /// periodically from a non-audio thread.
    pub fn check_clock_timeout(&self, now_us: u64) -> bool {
        let changed = self.recovery.lock().check_timeout(now_us);
        if changed {
            info!("external clock lost");
        }
        changed
    }

    pub fn reset_clock_recovery(&self) {
        self.recovery.lock().reset();
    }

    pub fn clock_estimate(&self) -> ClockEstimate {
        self.estimate.load()
    }

    pub fn shared_clock_estimate(&self) -> &Arc<SharedClockEstimate> {
        &self.estimate
    }

    // =========================================================================
    // Shadow state
    // =========================================================================

    pub fn shadow(&self) -> &Arc<ChannelShadow> {
        &self.shadow
    }

    /// Bitmask of sounding notes on `channel` (1-16).
    pub fn active_notes(&self, channel: u8) -> u128 {
        self.shadow.active_notes(channel)
    }

    pub fn control_value(&self, channel: u8, control: u8) -> u8 {
        self.shadow.control_value(channel, control)
    }

    // =========================================================================
    // Clock output and timers
    // =========================================================================

    /// The pulse clock generator, if clock output was enabled.
    #[cfg(feature = "clock")]
    pub fn clock_generator(&self) -> Option<&ClockGenerator> {
        self.clock.as_ref()
    }

    #[cfg(feature = "clock")]
    pub fn clock_generator_mut(&mut self) -> Option<&mut ClockGenerator> {
        self.clock.as_mut()
    }

    /// Take the queue the clock generator writes into, for the thread that
    /// delivers it to hardware.
    #[cfg(feature = "clock")]
    pub fn take_clock_output(&mut self) -> Option<DrainConsumer<ClockMessage>> {
        self.clock_output.take()
    }

    #[cfg(feature = "clock")]
    pub fn timer(&self) -> Option<&TimerHub> {
        self.timer.as_ref()
    }

    /// Stop every worker thread. Returns `false` if any did not exit within
    /// `timeout`.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let mut clean = true;

        #[cfg(feature = "clock")]
        {
            if let Some(clock) = self.clock.as_mut() {
                clean &= clock.stop(timeout);
            }
            if let Some(timer) = self.timer.as_mut() {
                clean &= timer.stop(timeout);
            }
        }

        clean &= self.publisher.shutdown(timeout);
        if clean {
            debug!("engine shut down");
        } else {
            warn!(?timeout, "engine shutdown left threads running");
        }
        clean
    }
}
