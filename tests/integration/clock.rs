//! Clock tests
//!
//! External pulse clock recovery feeding the transport, and the pulse clock
//! output thread following it.

use crate::helpers::tolerances::{BEAT_EPSILON, RECOVERED_TEMPO_EPSILON};
use crate::helpers::*;
use approx::assert_relative_eq;
use metrum::prelude::*;

const PULSES_PER_QUARTER: f64 = 24.0;

fn pulse_interval_us(bpm: f64) -> f64 {
    60_000_000.0 / (bpm * PULSES_PER_QUARTER)
}

/// Feed `count` pulses at `bpm` starting at `start_us`. Returns the time of
/// the last pulse.
fn feed_pulses(engine: &MetrumEngine, start_us: u64, bpm: f64, count: usize) -> u64 {
    let interval = pulse_interval_us(bpm);
    let mut last = start_us;
    for i in 0..count {
        last = start_us + (i as f64 * interval).round() as u64;
        engine.on_clock_pulse(last);
    }
    last
}

#[test]
fn test_external_clock_drives_position() {
    let mut rig = TestRig::new(MetrumEngine::builder().sync_source(SyncSource::ExternalClock));
    feed_pulses(&rig.engine, 1_000, 140.0, 48);

    let estimate = rig.engine.clock_estimate();
    assert!(estimate.is_locked);
    assert_relative_eq!(
        estimate.stable_tempo,
        140.0,
        epsilon = RECOVERED_TEMPO_EPSILON
    );

    rig.engine.transport().play();
    rig.blocks(8);
    // Eight blocks of 0.125 s at the recovered tempo.
    let expected = estimate.stable_tempo / 60.0;
    assert_relative_eq!(
        rig.engine.transport().current_beat(),
        expected,
        epsilon = BEAT_EPSILON
    );
    assert_relative_eq!(
        rig.engine.transport().effective_tempo() as f64,
        140.0,
        epsilon = 0.1
    );
}

#[test]
fn test_external_clock_adopts_tempo_change() {
    let engine = MetrumEngine::builder()
        .sync_source(SyncSource::ExternalClock)
        .build()
        .unwrap();
    let last = feed_pulses(&engine, 0, 120.0, 48);
    let next = last + pulse_interval_us(90.0).round() as u64;
    feed_pulses(&engine, next, 90.0, 48);

    let estimate = engine.clock_estimate();
    assert!(estimate.is_locked);
    assert_relative_eq!(
        estimate.stable_tempo,
        90.0,
        epsilon = RECOVERED_TEMPO_EPSILON
    );
    assert!(engine.shared_clock_estimate().outlier_count() > 0);
}

#[test]
fn test_external_clock_dropout_unlocks() {
    let engine = MetrumEngine::builder().build().unwrap();
    let last = feed_pulses(&engine, 0, 120.0, 30);
    assert!(engine.clock_estimate().is_locked);

    assert!(!engine.check_clock_timeout(last + 1_000));
    assert!(engine.check_clock_timeout(last + 250_000));
    assert!(!engine.clock_estimate().is_locked);

    engine.reset_clock_recovery();
    assert_eq!(engine.clock_estimate().last_pulse_us, 0);
}

#[cfg(feature = "clock")]
#[test]
fn test_clock_output_follows_transport() {
    use std::time::{Duration, Instant};

    init_tracing();
    let mut engine = MetrumEngine::builder()
        .tempo(300.0)
        .clock_output(true)
        .build()
        .unwrap();
    let mut processor = engine.take_processor().unwrap();
    let mut output = engine.take_clock_output().unwrap();
    assert!(engine.clock_generator().is_some_and(|c| c.is_running()));

    engine.transport().play();
    processor.process_audio_block(512, 48_000.0);

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        output.wait(Duration::from_millis(20));
        while let Some(message) = output.pop() {
            seen.push(message);
        }
        let pulses = seen
            .iter()
            .filter(|m| matches!(m, ClockMessage::Pulse { .. }))
            .count();
        if pulses >= 4 {
            break;
        }
    }

    assert_eq!(seen.first(), Some(&ClockMessage::Start));
    assert!(engine.clock_generator().is_some_and(|c| c.pulse_count() >= 4));
    assert!(engine.shutdown(Duration::from_secs(2)));
}
