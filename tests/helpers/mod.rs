//! Test helpers and fixtures for Metrum integration tests
//!
//! Every rig drives the audio-thread half by hand with a [`ManualClock`], so
//! block boundaries land on exact beat fractions and runs are reproducible.

pub mod tolerances;

use metrum::core::ring::BroadcastReceiver;
use metrum::prelude::*;
use metrum::{ManualClock, TransportEngine};
use std::sync::Arc;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48_000.0;

/// A quarter of a beat at 120 BPM.
pub const QUARTER_BEAT_BLOCK: usize = 6_000;

/// Host time covered by one [`QUARTER_BEAT_BLOCK`].
pub const BLOCK_US: u64 = 125_000;

/// Route engine logs to the test harness output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Engine plus the ends a host would hold: the audio-thread processor and
/// the event stream.
pub struct TestRig {
    pub engine: MetrumEngine,
    pub processor: TransportEngine,
    pub events: BroadcastReceiver<BridgeEvent>,
    pub clock: Arc<ManualClock>,
}

impl TestRig {
    pub fn new(builder: MetrumEngineBuilder) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(0));
        let mut engine = builder
            .sample_rate(TEST_SAMPLE_RATE)
            .host_clock(clock.clone())
            .build()
            .expect("Failed to create test engine");
        let processor = engine.take_processor().expect("processor already taken");
        let events = engine.take_events().expect("events already taken");
        Self {
            engine,
            processor,
            events,
            clock,
        }
    }

    /// Quarter notes on channel 1, no length.
    pub fn quarter_notes() -> Self {
        Self::new(MetrumEngine::builder().sequence(quarter_notes()))
    }

    pub fn block(&mut self) {
        self.processor
            .process_audio_block(QUARTER_BEAT_BLOCK, TEST_SAMPLE_RATE);
        self.clock.advance(BLOCK_US);
    }

    pub fn blocks(&mut self, count: usize) {
        for _ in 0..count {
            self.block();
        }
    }

    pub fn drain_events(&mut self) -> Vec<BridgeEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.events.pop() {
            out.push(event);
        }
        out
    }

    pub fn notifications(&mut self) -> Vec<TransportNotification> {
        let mut out = Vec::new();
        while let Some(n) = self.engine.poll_notification() {
            out.push(n);
        }
        out
    }
}

/// One note per beat on channel 1.
pub fn quarter_notes() -> SequenceSnapshot {
    single_note_pattern(60)
}

pub fn single_note_pattern(note: u8) -> SequenceSnapshot {
    SequenceSnapshot::new(960).with_track(StepTrack::new(1, 1, vec![Step::note(note, 1.0)]))
}

pub fn note_ons(events: &[BridgeEvent]) -> Vec<u8> {
    events
        .iter()
        .filter(|e| e.is_note_on())
        .map(|e| e.index)
        .collect()
}
