//! Snapshot publication tests
//!
//! A loader thread publishing while an "audio thread" reads must never
//! observe a torn or freed snapshot.

use crate::helpers::*;
use metrum::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Snapshot whose shape encodes `generation`, so a reader can check it is
/// internally consistent.
fn generation(generation: usize) -> SequenceSnapshot {
    let tracks = generation % 4 + 1;
    (0..tracks).fold(
        SequenceSnapshot::new(960).with_length(generation as f64 + 1.0),
        |snapshot, track| {
            snapshot.with_track(StepTrack::new(
                track as u8 + 1,
                4,
                vec![Step::note(36 + track as u8, 1.0); 16],
            ))
        },
    )
}

#[test]
fn test_concurrent_publish_and_load() {
    init_tracing();
    let engine = MetrumEngine::builder()
        .sequence(generation(0))
        .snapshot_pool(2)
        .build()
        .unwrap();
    let reader = engine.snapshot_publisher().reader();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let audio = scope.spawn(|| {
            let mut last_id = 0;
            let mut loads = 0u64;
            while !done.load(Ordering::Acquire) {
                let snapshot = reader.load();
                let length = snapshot.length_beats.expect("every generation has a length");
                let generation = length as usize - 1;
                assert_eq!(snapshot.tracks.len(), generation % 4 + 1);
                assert!(snapshot.tracks.iter().all(|t| t.steps.len() == 16));
                assert!(snapshot.id >= last_id, "snapshot ids went backwards");
                last_id = snapshot.id;
                loads += 1;
            }
            loads
        });

        for n in 1..=500 {
            let next = match engine.reclaim_sequence() {
                Some(mut recycled) => {
                    let fresh = generation(n);
                    recycled.ticks_per_quarter = fresh.ticks_per_quarter;
                    recycled.length_beats = fresh.length_beats;
                    recycled.tracks.extend(fresh.tracks);
                    recycled
                }
                None => generation(n),
            };
            engine.publish_sequence(next).unwrap();
        }
        done.store(true, Ordering::Release);

        assert!(audio.join().unwrap() > 0);
    });

    assert_eq!(engine.current_sequence().length_beats, Some(501.0));
}

#[test]
fn test_retired_snapshots_are_deleted_off_thread() {
    let mut engine = MetrumEngine::builder().snapshot_pool(1).build().unwrap();

    for n in 1..=10 {
        engine.publish_sequence(generation(n)).unwrap();
    }
    // One retired snapshot stays pooled; the rest go to the deleter.
    assert_eq!(engine.snapshot_publisher().pool_len(), 1);

    let deadline = Instant::now() + Duration::from_secs(2);
    while engine.snapshot_publisher().deleted_count() < 9 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(engine.snapshot_publisher().deleted_count(), 9);
    assert!(engine.shutdown(Duration::from_secs(1)));
}

#[test]
fn test_invalid_sequence_is_rejected() {
    let engine = MetrumEngine::builder().build().unwrap();
    let before = engine.current_sequence().id;

    let result = engine.publish_sequence(SequenceSnapshot::new(960).with_length(-1.0));
    assert!(result.is_err());
    assert_eq!(engine.current_sequence().id, before);
}
