//! Builder for configuring and constructing a `MetrumEngine`.

use crate::{MetrumEngine, Result};
use metrum_core::{
    ChannelShadow, ClockRecoveryFilter, EngineConfig, HostClock, HotCounters, LoopRegion,
    MonotonicClock, PeerSession, PlaybackSettings, SequenceSnapshot, SharedClockEstimate,
    SnapshotPublisher, SyncSource, TimeSignature, TransportManager, TransportState,
};
use metrum_sequencer::{EngineContext, TransportEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

#[cfg(feature = "clock")]
use metrum_clock::{ClockGenerator, TimerHub};
#[cfg(feature = "clock")]
use std::time::Duration;

/// Retired snapshots kept for reuse before going to the deleter thread.
pub const DEFAULT_SNAPSHOT_POOL: usize = 4;

/// Every field of [`EngineConfig`] can be set here or passed whole with
/// [`MetrumEngineBuilder::config`]. Validation happens in `build()`.
///
/// # Example
///
/// ```ignore
/// use metrum::prelude::*;
///
/// let engine = MetrumEngine::builder()
///     .sample_rate(44_100.0)
///     .tempo(96.0)
///     .sync_source(SyncSource::ExternalClock)
///     .clock_output(true)
///     .build()?;
/// ```
pub struct MetrumEngineBuilder {
    config: EngineConfig,
    host_clock: Option<Arc<dyn HostClock>>,
    peer: Option<Arc<dyn PeerSession>>,
    sequence: Option<SequenceSnapshot>,
    snapshot_pool: usize,

    #[cfg(feature = "clock")]
    clock_output: bool,

    #[cfg(feature = "clock")]
    timer_resolution: Option<Duration>,
}

impl Default for MetrumEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            host_clock: None,
            peer: None,
            sequence: None,
            snapshot_pool: DEFAULT_SNAPSHOT_POOL,

            #[cfg(feature = "clock")]
            clock_output: false,

            #[cfg(feature = "clock")]
            timer_resolution: None,
        }
    }
}

impl MetrumEngineBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 48000
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Default: 120 BPM
    pub fn tempo(mut self, bpm: f32) -> Self {
        self.config.tempo = bpm;
        self
    }

    pub fn ticks_per_quarter(mut self, ticks: u32) -> Self {
        self.config.ticks_per_quarter = ticks;
        self
    }

    pub fn time_signature(mut self, numerator: u32, denominator: u32) -> Self {
        self.config.time_signature = TimeSignature::new(numerator, denominator);
        self
    }

    pub fn sync_source(mut self, source: SyncSource) -> Self {
        self.config.sync_source = source;
        self
    }

    /// Join a tempo-sync session. Also selects [`SyncSource::PeerSync`].
    pub fn peer_session(mut self, peer: Arc<dyn PeerSession>) -> Self {
        self.peer = Some(peer);
        self.config.sync_source = SyncSource::PeerSync;
        self
    }

    /// Default: [`MonotonicClock`]
    pub fn host_clock(mut self, clock: Arc<dyn HostClock>) -> Self {
        self.host_clock = Some(clock);
        self
    }

    pub fn loop_region(mut self, region: LoopRegion) -> Self {
        self.config.loop_region = region;
        self
    }

    pub fn swing(mut self, amount: f32) -> Self {
        self.config.swing = amount;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    /// Default: 256
    pub fn scheduler_pool_size(mut self, slots: usize) -> Self {
        self.config.scheduler_pool_size = slots;
        self
    }

    /// Content playing from the first block.
    pub fn sequence(mut self, snapshot: SequenceSnapshot) -> Self {
        self.sequence = Some(snapshot);
        self
    }

    /// Default: [`DEFAULT_SNAPSHOT_POOL`]
    pub fn snapshot_pool(mut self, capacity: usize) -> Self {
        self.snapshot_pool = capacity;
        self
    }

    /// Start the pulse clock thread on build.
    #[cfg(feature = "clock")]
    pub fn clock_output(mut self, enabled: bool) -> Self {
        self.clock_output = enabled;
        self
    }

    /// Run a shared periodic timer at `resolution`.
    #[cfg(feature = "clock")]
    pub fn timer_hub(mut self, resolution: Duration) -> Self {
        self.timer_resolution = Some(resolution);
        self
    }

    pub fn build(self) -> Result<MetrumEngine> {
        let config = self.config;
        config.validate()?;
        if config.sync_source == SyncSource::PeerSync && self.peer.is_none() {
            return Err(metrum_core::Error::InvalidConfig(
                "peer sync needs a peer session".into(),
            )
            .into());
        }

        let state = Arc::new(TransportState::new(
            config.ticks_per_quarter,
            config.tempo,
            config.time_signature,
        ));
        state.set_global_transpose(config.global_transpose);
        let manager = Arc::new(TransportManager::new(
            state,
            Arc::new(HotCounters::new()),
            config.sync_source,
            config.command_capacity,
        ));
        let settings = Arc::new(PlaybackSettings::from_config(&config));
        let estimate = Arc::new(SharedClockEstimate::new());
        let shadow = Arc::new(ChannelShadow::new());
        let host_clock = self
            .host_clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let sequence = self
            .sequence
            .unwrap_or_else(|| SequenceSnapshot::new(config.ticks_per_quarter));
        let publisher = SnapshotPublisher::new(sequence, self.snapshot_pool)?;
        let recovery = ClockRecoveryFilter::new().with_shared(Arc::clone(&estimate));

        let ctx = EngineContext {
            manager: Arc::clone(&manager),
            settings: Arc::clone(&settings),
            clock_estimate: Arc::clone(&estimate),
            shadow: Arc::clone(&shadow),
            snapshots: publisher.reader(),
            host_clock: Arc::clone(&host_clock),
            peer: self.peer,
        };
        let (processor, endpoints) = TransportEngine::new(&config, ctx)?;

        #[cfg(feature = "clock")]
        let (clock, clock_output) = if self.clock_output {
            let (mut generator, output) = ClockGenerator::new(
                config.clock.clone(),
                Arc::clone(&manager),
                Arc::clone(&estimate),
                Arc::clone(&host_clock),
            )?;
            generator.start()?;
            (Some(generator), Some(output))
        } else {
            (None, None)
        };

        #[cfg(feature = "clock")]
        let timer = self.timer_resolution.map(TimerHub::new).transpose()?;

        info!(
            sample_rate = config.sample_rate,
            tempo = config.tempo,
            source = ?config.sync_source,
            "metrum engine built"
        );

        Ok(MetrumEngine {
            config,
            manager,
            settings,
            estimate,
            shadow,
            publisher,
            recovery: Mutex::new(recovery),
            processor: Some(processor),
            scheduler: endpoints.scheduler,
            events: Some(endpoints.events),
            notifications: Some(endpoints.notifications),

            #[cfg(feature = "clock")]
            clock,
            #[cfg(feature = "clock")]
            clock_output,
            #[cfg(feature = "clock")]
            timer,
        })
    }
}
