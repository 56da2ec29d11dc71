//! Loaded-content snapshots.
//!
//! ```text
//! loader thread                          audio thread
//! ┌─────────────────┐  ArcSwap::swap    ┌──────────────────┐
//! │SnapshotPublisher│ ────────────────▶ │ SnapshotReader   │
//! └───────┬─────────┘                   └──────────────────┘
//!         │ retired
//!         ▼
//!   recycle pool (Mutex, loader side only)
//!         │ overflow
//!         ▼
//!   DeferredDeleter thread: drops once no reader holds it
//! ```
//!
//! A snapshot is immutable once published. The audio thread only loads the
//! pointer and never holds the last reference to a retired snapshot, so no
//! deallocation happens there.

use crate::error::{Error, Result};
use crate::event::BridgeEvent;
use crate::lockfree::AtomicCounter;
use crate::transport::DEFAULT_TICKS_PER_QUARTER;
use arc_swap::{ArcSwap, Guard};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_RECYCLE_POOL_SIZE: usize = 4;

/// Most step tracks a snapshot may carry; per-track playback state is
/// preallocated to this size.
pub const MAX_TRACKS: usize = 64;

/// How often the deleter re-checks snapshots still held by a reader.
const DELETER_RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub note: u8,
    /// 0..=1.
    pub velocity: f32,
    /// Chance the step fires, 0..=1.
    pub probability: f32,
    /// Note length as a fraction of the step.
    pub gate: f32,
    pub active: bool,
}

impl Step {
    pub fn note(note: u8, velocity: f32) -> Self {
        Self {
            note: note.min(127),
            velocity: velocity.clamp(0.0, 1.0),
            probability: 1.0,
            gate: 0.5,
            active: true,
        }
    }

    pub fn rest() -> Self {
        Self {
            active: false,
            ..Self::note(0, 0.0)
        }
    }

    pub fn with_probability(mut self, probability: f32) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_gate(mut self, gate: f32) -> Self {
        self.gate = gate.max(0.0);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepTrack {
    /// 1..=16.
    pub channel: u8,
    pub steps_per_beat: u32,
    pub steps: Vec<Step>,
}

impl StepTrack {
    pub fn new(channel: u8, steps_per_beat: u32, steps: Vec<Step>) -> Self {
        Self {
            channel: channel.clamp(1, 16),
            steps_per_beat: steps_per_beat.max(1),
            steps,
        }
    }

    #[inline]
    pub fn step_duration(&self) -> f64 {
        1.0 / self.steps_per_beat as f64
    }
}

/// A decoded file event at an absolute beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub beat: f64,
    pub event: BridgeEvent,
}

/// Everything currently loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSnapshot {
    /// Assigned on publish.
    pub id: u64,
    pub ticks_per_quarter: u32,
    /// End of the content; `None` for endless step patterns.
    pub length_beats: Option<f64>,
    pub tracks: Vec<StepTrack>,
    /// Sorted by beat.
    file_events: Vec<TimedEvent>,
}

impl SequenceSnapshot {
    pub fn new(ticks_per_quarter: u32) -> Self {
        Self {
            id: 0,
            ticks_per_quarter: ticks_per_quarter.max(1),
            length_beats: None,
            tracks: Vec::new(),
            file_events: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(DEFAULT_TICKS_PER_QUARTER)
    }

    pub fn with_track(mut self, track: StepTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_length(mut self, beats: f64) -> Self {
        self.length_beats = Some(beats);
        self
    }

    /// Replace the file events. Sorted stably so simultaneous events keep
    /// their file order.
    pub fn with_file_events(mut self, events: impl IntoIterator<Item = TimedEvent>) -> Self {
        self.set_file_events(events);
        self
    }

    pub fn set_file_events(&mut self, events: impl IntoIterator<Item = TimedEvent>) {
        self.file_events.clear();
        self.file_events.extend(events);
        self.file_events.sort_by(|a, b| a.beat.total_cmp(&b.beat));
    }

    pub fn file_events(&self) -> &[TimedEvent] {
        &self.file_events
    }

    /// File events with `start <= beat < end`.
    #[inline]
    pub fn file_events_in(&self, start: f64, end: f64) -> &[TimedEvent] {
        let lo = self.file_events.partition_point(|e| e.beat < start);
        let hi = self.file_events.partition_point(|e| e.beat < end);
        &self.file_events[lo..hi.max(lo)]
    }

    /// Empty the content but keep the allocations for reuse.
    pub fn clear(&mut self) {
        self.id = 0;
        self.length_beats = None;
        self.tracks.clear();
        self.file_events.clear();
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracks.len() > MAX_TRACKS {
            return Err(Error::InvalidConfig(format!(
                "snapshot carries {} tracks, limit is {MAX_TRACKS}",
                self.tracks.len()
            )));
        }
        if let Some(length) = self.length_beats {
            if !(length > 0.0 && length.is_finite()) {
                return Err(Error::InvalidBeat(length));
            }
        }
        if let Some(bad) = self.file_events.iter().find(|e| !(e.beat >= 0.0)) {
            return Err(Error::InvalidBeat(bad.beat));
        }
        Ok(())
    }
}

impl Default for SequenceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Audio-thread view of the current snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    current: Arc<ArcSwap<SequenceSnapshot>>,
}

impl SnapshotReader {
    /// Lock-free load. Keep the guard for the duration of one block.
    #[inline]
    pub fn load(&self) -> Guard<Arc<SequenceSnapshot>> {
        self.current.load()
    }
}

/// Loader-side owner of the current snapshot.
pub struct SnapshotPublisher {
    current: Arc<ArcSwap<SequenceSnapshot>>,
    pool: Mutex<Vec<Arc<SequenceSnapshot>>>,
    pool_capacity: usize,
    next_id: AtomicU64,
    deleter: DeferredDeleter<SequenceSnapshot>,
}

impl SnapshotPublisher {
    pub fn new(initial: SequenceSnapshot, pool_capacity: usize) -> Result<Self> {
        let mut initial = initial;
        initial.id = 1;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            pool: Mutex::new(Vec::with_capacity(pool_capacity)),
            pool_capacity,
            next_id: AtomicU64::new(2),
            deleter: DeferredDeleter::spawn("metrum-snapshot-deleter")?,
        })
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> Arc<SequenceSnapshot> {
        self.current.load_full()
    }

    /// Swap in a new snapshot. Returns its id.
    pub fn publish(&self, snapshot: SequenceSnapshot) -> Result<u64> {
        snapshot.validate()?;
        let mut snapshot = snapshot;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        snapshot.id = id;

        let retired = self.current.swap(Arc::new(snapshot));
        debug!(id, retired = retired.id, "published snapshot");
        self.retire(retired);
        Ok(id)
    }

    /// Take back a retired snapshot nobody reads any more, to refill its
    /// allocations for the next publish.
    pub fn reclaim(&self) -> Option<SequenceSnapshot> {
        let mut pool = self.pool.lock();
        let index = pool.iter().position(|s| Arc::strong_count(s) == 1)?;
        let arc = pool.swap_remove(index);
        match Arc::try_unwrap(arc) {
            Ok(mut snapshot) => {
                snapshot.clear();
                Some(snapshot)
            }
            Err(arc) => {
                pool.push(arc);
                None
            }
        }
    }

    pub fn pool_len(&self) -> usize {
        self.pool.lock().len()
    }

    /// Snapshots destroyed by the deleter thread so far.
    pub fn deleted_count(&self) -> u64 {
        self.deleter.deleted_count()
    }

    /// Snapshots handed to the deleter and not yet destroyed.
    pub fn deferred_count(&self) -> u64 {
        self.deleter.pending_count()
    }

    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.deleter.stop(timeout)
    }

    fn retire(&self, retired: Arc<SequenceSnapshot>) {
        let mut pool = self.pool.lock();
        if pool.len() < self.pool_capacity {
            pool.push(retired);
            return;
        }
        drop(pool);
        if !self.deleter.retire(retired) {
            warn!("snapshot deleter gone; retired snapshot dropped on loader thread");
        }
    }
}

enum DeleterMsg<T> {
    Retire(Arc<T>),
    Shutdown,
}

/// Background thread that drops shared values once their last reader is done.
pub struct DeferredDeleter<T: Send + Sync + 'static> {
    tx: Sender<DeleterMsg<T>>,
    exited_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    retired: Arc<AtomicCounter>,
    deleted: Arc<AtomicCounter>,
}

impl<T: Send + Sync + 'static> DeferredDeleter<T> {
    pub fn spawn(name: &'static str) -> Result<Self> {
        let (tx, rx) = unbounded();
        let (exited_tx, exited_rx) = bounded(1);
        let deleted = Arc::new(AtomicCounter::new());
        let thread_deleted = Arc::clone(&deleted);

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                deleter_loop(rx, &thread_deleted);
                let _ = exited_tx.send(());
            })
            .map_err(|source| Error::ThreadSpawn { name, source })?;

        debug!(name, "deferred deleter started");
        Ok(Self {
            tx,
            exited_rx,
            handle: Some(handle),
            retired: Arc::new(AtomicCounter::new()),
            deleted,
        })
    }

    /// Hand over a value. Returns `false` if the thread has exited (the value
    /// is then dropped by the caller).
    pub fn retire(&self, value: Arc<T>) -> bool {
        if self.tx.send(DeleterMsg::Retire(value)).is_ok() {
            self.retired.increment();
            true
        } else {
            false
        }
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.get()
    }

    pub fn pending_count(&self) -> u64 {
        self.retired.get().saturating_sub(self.deleted.get())
    }

    /// Ask the thread to exit. Returns `false` if it did not finish within
    /// `timeout`; it is then detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.tx.send(DeleterMsg::Shutdown);
        match self.exited_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                debug!("deferred deleter stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "deferred deleter did not stop in time");
                false
            }
        }
    }
}

impl<T: Send + Sync + 'static> Drop for DeferredDeleter<T> {
    fn drop(&mut self) {
        self.stop(DEFAULT_STOP_TIMEOUT);
    }
}

fn deleter_loop<T>(rx: Receiver<DeleterMsg<T>>, deleted: &AtomicCounter) {
    let mut waiting: Vec<Arc<T>> = Vec::new();
    loop {
        match rx.recv_timeout(DELETER_RETRY_INTERVAL) {
            Ok(DeleterMsg::Retire(value)) => waiting.push(value),
            Ok(DeleterMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        waiting.retain(|value| {
            if Arc::strong_count(value) == 1 {
                deleted.increment();
                false
            } else {
                true
            }
        });
    }
    if !waiting.is_empty() {
        debug!(remaining = waiting.len(), "deferred deleter releasing on exit");
    }
}
