//! Engine lifecycle tests
//!
//! Construction, validation of configuration, one-shot endpoints, shutdown.

use crate::helpers::*;
use metrum::prelude::*;
use metrum::{EngineConfig, Error, LocalSession};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_default_engine_builds() {
    init_tracing();
    let mut engine = MetrumEngine::builder().build().unwrap();

    assert_eq!(engine.sample_rate(), 48_000.0);
    assert!(!engine.transport().is_playing());
    assert_eq!(engine.transport().motion(), MotionState::Stopped);
    assert!(engine.shutdown(Duration::from_secs(1)));
}

#[test]
fn test_endpoints_are_handed_out_once() {
    let mut engine = MetrumEngine::builder().build().unwrap();

    assert!(engine.take_processor().is_some());
    assert!(engine.take_processor().is_none());
    assert!(engine.take_events().is_some());
    assert!(engine.take_events().is_none());
    assert!(engine.take_notifications().is_some());
    assert!(engine.poll_notification().is_none());
}

#[test]
fn test_invalid_tempo_is_rejected() {
    let result = MetrumEngine::builder().tempo(500.0).build();
    assert!(matches!(
        result,
        Err(Error::Core(metrum::core::Error::InvalidTempo(_)))
    ));
}

#[test]
fn test_invalid_loop_is_rejected() {
    let result = MetrumEngine::builder()
        .loop_region(LoopRegion::new(4.0, 2.0))
        .build();
    assert!(matches!(
        result,
        Err(Error::Core(metrum::core::Error::InvalidLoopRange { .. }))
    ));
}

#[test]
fn test_peer_sync_requires_session() {
    let result = MetrumEngine::builder()
        .sync_source(SyncSource::PeerSync)
        .build();
    assert!(matches!(
        result,
        Err(Error::Core(metrum::core::Error::InvalidConfig(_)))
    ));

    let engine = MetrumEngine::builder()
        .peer_session(Arc::new(LocalSession::new(120.0)))
        .build()
        .unwrap();
    assert_eq!(engine.transport().get_sync_source(), SyncSource::PeerSync);
}

#[test]
fn test_config_round_trips_into_engine() {
    let config = EngineConfig {
        tempo: 97.0,
        swing: 0.25,
        roll_division: 16,
        ..Default::default()
    };
    let engine = MetrumEngine::builder().config(config.clone()).build().unwrap();

    assert_eq!(engine.config(), &config);
    assert_eq!(engine.transport().get_tempo(), 97.0);
    assert_eq!(engine.playback_settings().swing(), 0.25);
    assert_eq!(engine.playback_settings().roll_division(), 16);
}

#[test]
fn test_fluent_handle_rejects_bad_values_without_panicking() {
    let engine = MetrumEngine::builder().build().unwrap();

    engine.transport().tempo(1000.0).seek(-1.0).loop_range(3.0, 1.0);
    assert_eq!(engine.transport().get_tempo(), 120.0);
    assert!(!engine.transport().get_loop_region().enabled);
}

#[cfg(feature = "clock")]
#[test]
fn test_timer_hub_runs_subscribers() {
    let mut engine = MetrumEngine::builder()
        .timer_hub(Duration::from_millis(1))
        .build()
        .unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();

    let subscription = engine
        .timer()
        .expect("timer hub configured")
        .subscribe(Duration::from_millis(2), move || {
            let _ = tx.send(());
        });
    for _ in 0..3 {
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }
    drop(subscription);

    assert_eq!(engine.timer().map(|t| t.subscriber_count()), Some(0));
    assert!(engine.shutdown(Duration::from_secs(1)));
}
