//! Peer tempo-sync session seam.
//!
//! The network protocol lives outside this crate. The engine only reads the
//! shared timeline and proposes start/stop; nothing flows back through the
//! ring channels.

use crate::lockfree::{AtomicDouble, AtomicFlag};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A shared beat timeline. Implementations are called from the audio thread
/// and must not block or allocate.
pub trait PeerSession: Send + Sync {
    /// Beat on the shared timeline at host time `time_us`.
    fn beat_at_time(&self, time_us: u64, quantum: f64) -> f64;

    /// Position within the current quantum, in `[0, quantum)`.
    fn phase_at_time(&self, time_us: u64, quantum: f64) -> f64 {
        self.beat_at_time(time_us, quantum).rem_euclid(quantum)
    }

    fn tempo(&self) -> f64;

    fn num_peers(&self) -> usize;

    fn is_playing(&self) -> bool;

    fn request_start(&self, time_us: u64);

    fn request_stop(&self, time_us: u64);
}

/// Single-member session: a timeline with nobody else on it. Useful as the
/// default and for tests.
pub struct LocalSession {
    tempo: AtomicDouble,
    origin_us: AtomicU64,
    origin_beat: AtomicDouble,
    playing: AtomicFlag,
    peers: AtomicUsize,
}

impl LocalSession {
    pub fn new(tempo: f64) -> Self {
        Self {
            tempo: AtomicDouble::new(tempo),
            origin_us: AtomicU64::new(0),
            origin_beat: AtomicDouble::new(0.0),
            playing: AtomicFlag::new(false),
            peers: AtomicUsize::new(0),
        }
    }

    /// Change tempo without moving the beat at `now_us`.
    pub fn set_tempo(&self, bpm: f64, now_us: u64) {
        let beat = self.beat_at_time(now_us, 1.0);
        self.origin_beat.set(beat);
        self.origin_us.store(now_us, Ordering::Release);
        self.tempo.set(bpm);
    }

    pub fn set_num_peers(&self, peers: usize) {
        self.peers.store(peers, Ordering::Release);
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl PeerSession for LocalSession {
    fn beat_at_time(&self, time_us: u64, _quantum: f64) -> f64 {
        let origin_us = self.origin_us.load(Ordering::Acquire);
        let elapsed_s = (time_us as f64 - origin_us as f64) / 1_000_000.0;
        self.origin_beat.get() + elapsed_s * self.tempo.get() / 60.0
    }

    fn tempo(&self) -> f64 {
        self.tempo.get()
    }

    fn num_peers(&self) -> usize {
        self.peers.load(Ordering::Acquire)
    }

    fn is_playing(&self) -> bool {
        self.playing.get()
    }

    fn request_start(&self, _time_us: u64) {
        self.playing.set(true);
    }

    fn request_stop(&self, _time_us: u64) {
        self.playing.set(false);
    }
}
