//! Transport integration tests
//!
//! The fluent handle and engine methods on the control side, the processor
//! driven block by block on the "audio thread" side.

use crate::helpers::tolerances::BEAT_EPSILON;
use crate::helpers::*;
use approx::assert_relative_eq;
use metrum::core::EventKind;
use metrum::prelude::*;
use metrum::{LocalSession, PeerSession};
use std::sync::Arc;

#[test]
fn test_transport_play_emits_one_note_per_beat() {
    let mut rig = TestRig::quarter_notes();

    rig.engine.transport().play();
    rig.blocks(16);

    assert!(rig.engine.transport().is_playing());
    assert_relative_eq!(
        rig.engine.transport().current_beat(),
        4.0,
        epsilon = BEAT_EPSILON
    );
    assert_eq!(note_ons(&rig.drain_events()), vec![60, 60, 60, 60]);
    assert_eq!(
        rig.notifications(),
        vec![TransportNotification::Started { beat: 0.0 }]
    );
}

#[test]
fn test_transport_pause_holds_position() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().play();
    rig.blocks(2);

    rig.engine.transport().pause();
    rig.block();
    let held = rig.engine.transport().current_beat();
    rig.blocks(4);
    assert_eq!(rig.engine.transport().current_beat(), held);
    assert_eq!(rig.engine.transport().motion(), MotionState::Paused);
    assert_eq!(rig.engine.active_notes(1), 0);

    rig.engine.transport().resume();
    rig.block();
    assert!(rig.engine.transport().current_beat() > held);
}

#[test]
fn test_transport_stop_rewinds_and_releases() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().play();
    rig.blocks(3);
    rig.drain_events();

    rig.engine.transport().stop();
    rig.block();

    assert_eq!(rig.engine.transport().current_beat(), 0.0);
    assert_eq!(rig.engine.transport().motion(), MotionState::Stopped);
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| e.kind == EventKind::AllNotesOff && e.channel == 1));
    assert!(rig
        .notifications()
        .contains(&TransportNotification::Stopped));
}

#[test]
fn test_transport_loop_range_wraps() {
    let mut rig = TestRig::quarter_notes();

    rig.engine.transport().loop_range(0.0, 1.0).play();
    rig.blocks(10);

    assert_eq!(rig.engine.transport().loop_iteration(), 2);
    assert_relative_eq!(
        rig.engine.transport().current_beat(),
        0.5,
        epsilon = BEAT_EPSILON
    );
    let jumps = rig
        .drain_events()
        .iter()
        .filter(|e| e.kind == EventKind::PositionJump)
        .count();
    assert_eq!(jumps, 2);
}

#[test]
fn test_transport_sequence_end_stops() {
    let snapshot = quarter_notes().with_length(2.0);
    let mut rig = TestRig::new(MetrumEngine::builder().sequence(snapshot));
    rig.engine.transport().play();
    rig.blocks(12);

    assert_eq!(rig.engine.transport().motion(), MotionState::Stopped);
    assert!(rig
        .notifications()
        .contains(&TransportNotification::SequenceEnded { beat: 2.0 }));
}

#[test]
fn test_transport_quantized_seek() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().quantized_seek(true).play();
    rig.block();

    rig.engine.transport().seek(8.0);
    rig.block();
    assert_relative_eq!(
        rig.engine.transport().current_beat(),
        0.5,
        epsilon = BEAT_EPSILON
    );

    rig.blocks(2);
    assert_relative_eq!(
        rig.engine.transport().current_beat(),
        8.0,
        epsilon = BEAT_EPSILON
    );
}

#[test]
fn test_transport_transpose_applies_to_steps() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().transpose(12).play();
    rig.blocks(8);

    assert_eq!(note_ons(&rig.drain_events()), vec![72, 72]);
}

#[test]
fn test_scheduled_event_fires_at_its_beat() {
    let mut rig = TestRig::new(MetrumEngine::builder());
    let cc = BridgeEvent::control_change(EventSource::Ui, 2, 74, 0.5);

    assert!(rig.engine.schedule_event(cc, 0.6));
    rig.engine.transport().play();
    rig.blocks(2);
    assert!(rig.drain_events().is_empty());

    rig.block();
    assert_eq!(rig.drain_events(), vec![cc]);
    assert_eq!(rig.engine.control_value(2, 74), 64);
}

#[test]
fn test_all_notes_off_silences_shadow() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().play();
    rig.block();
    assert_ne!(rig.engine.active_notes(1) & (1 << 60), 0);

    assert!(rig.engine.all_notes_off());
    rig.block();

    assert_eq!(rig.engine.active_notes(1), 0);
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| e.kind == EventKind::AllNotesOff && e.channel == 1));
}

#[test]
fn test_published_sequence_takes_over() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().play();
    rig.blocks(4);
    assert_eq!(note_ons(&rig.drain_events()), vec![60]);

    let id = rig.engine.publish_sequence(single_note_pattern(64)).unwrap();
    assert_eq!(rig.engine.current_sequence().id, id);
    rig.blocks(8);
    assert_eq!(note_ons(&rig.drain_events()), vec![64, 64]);

    let recycled = rig.engine.reclaim_sequence().expect("retired snapshot");
    assert!(recycled.tracks.is_empty());
}

#[test]
fn test_roll_division_from_handle_publishes_window() {
    let mut rig = TestRig::quarter_notes();
    rig.engine.transport().play();
    rig.block();

    rig.engine.transport().roll(16);
    rig.block();
    let hot = Arc::clone(rig.engine.transport_manager().hot_counters());
    assert_eq!(hot.roll_interval_ticks(), 240);

    rig.engine.transport().release_roll();
    rig.block();
    assert_eq!(hot.roll_interval_ticks(), 0);
}

#[test]
fn test_peer_session_follows_local_start() {
    let peer = Arc::new(LocalSession::new(120.0));
    let mut rig = TestRig::new(
        MetrumEngine::builder()
            .sequence(quarter_notes())
            .peer_session(peer.clone()),
    );

    rig.block();
    rig.engine.transport().play();
    rig.block();
    assert_eq!(rig.engine.transport().motion(), MotionState::Stopped);

    rig.blocks(15);
    assert_eq!(rig.engine.transport().motion(), MotionState::Playing);
    assert!(peer.is_playing());
}
