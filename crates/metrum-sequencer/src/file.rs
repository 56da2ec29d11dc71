//! File playback: emits decoded file events crossing a beat span.

use metrum_core::{EventSink, SequenceSnapshot};

/// Emit the snapshot's file events with `start <= beat < end`, transposed.
/// Returns how many were emitted, dropped or not.
#[inline]
pub fn play_span(
    snapshot: &SequenceSnapshot,
    start: f64,
    end: f64,
    transpose: i32,
    sink: &mut impl EventSink,
) -> usize {
    let events = snapshot.file_events_in(start, end);
    for timed in events {
        sink.emit(timed.event.transposed(transpose));
    }
    events.len()
}
