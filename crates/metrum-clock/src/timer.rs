//! Shared periodic timer.
//!
//! One thread ticks at a fixed resolution and runs every subscriber whose
//! period has elapsed. Subscribers are cheap: a boxed callback behind a
//! per-subscriber mutex that doubles as its liveness token. Dropping the
//! [`Subscription`] empties the slot under that mutex, so once `drop`
//! returns the callback will never run again.
//!
//! Callbacks run on the hub thread and must not drop their own
//! [`Subscription`]; that would wait on the lock the hub holds while calling
//! them.

use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Callback = Box<dyn FnMut() + Send>;

struct Slot {
    id: u64,
    period: Duration,
    next_due: Mutex<Instant>,
    callback: Mutex<Option<Callback>>,
}

#[derive(Default)]
struct Registry {
    slots: Mutex<Vec<Arc<Slot>>>,
    next_id: AtomicU64,
}

/// Keeps a callback registered. Drop to unsubscribe.
pub struct Subscription {
    slot: Arc<Slot>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn period(&self) -> Duration {
        self.slot.period
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Waits for an in-flight invocation to finish.
        self.slot.callback.lock().take();
        if let Some(registry) = self.registry.upgrade() {
            registry.slots.lock().retain(|s| s.id != self.slot.id);
        }
    }
}

pub struct TimerHub {
    registry: Arc<Registry>,
    shutdown_tx: Sender<()>,
    exited_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    resolution: Duration,
}

impl TimerHub {
    /// Start the hub thread, ticking every `resolution`.
    pub fn new(resolution: Duration) -> Result<Self> {
        let resolution = resolution.max(Duration::from_millis(1));
        let registry = Arc::new(Registry::default());
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (exited_tx, exited_rx) = bounded(1);

        let thread_registry = Arc::clone(&registry);
        let handle = thread::Builder::new()
            .name("metrum-timer-hub".into())
            .spawn(move || {
                hub_loop(&thread_registry, &shutdown_rx, resolution);
                let _ = exited_tx.send(());
            })?;

        debug!(?resolution, "timer hub started");
        Ok(Self {
            registry,
            shutdown_tx,
            exited_rx,
            handle: Some(handle),
            resolution,
        })
    }

    /// Run `callback` every `period` (rounded up to the hub resolution) on
    /// the hub thread until the returned [`Subscription`] is dropped.
    pub fn subscribe(
        &self,
        period: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Subscription {
        let period = period.max(self.resolution);
        let slot = Arc::new(Slot {
            id: self.registry.next_id.fetch_add(1, Ordering::Relaxed),
            period,
            next_due: Mutex::new(Instant::now() + period),
            callback: Mutex::new(Some(Box::new(callback))),
        });
        self.registry.slots.lock().push(Arc::clone(&slot));
        Subscription {
            slot,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.slots.lock().len()
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Stop the hub thread. Returns `false` if it did not exit within
    /// `timeout`; it is then detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.shutdown_tx.try_send(());
        match self.exited_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                debug!("timer hub stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "timer hub did not stop in time");
                false
            }
        }
    }
}

impl Drop for TimerHub {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}

fn hub_loop(registry: &Registry, shutdown: &Receiver<()>, resolution: Duration) {
    let mut due: Vec<Arc<Slot>> = Vec::new();
    loop {
        match shutdown.recv_timeout(resolution) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        due.clear();
        due.extend(
            registry
                .slots
                .lock()
                .iter()
                .filter(|slot| *slot.next_due.lock() <= now)
                .cloned(),
        );

        for slot in &due {
            {
                let mut next_due = slot.next_due.lock();
                *next_due += slot.period;
                // Skip missed periods instead of firing a burst.
                if *next_due <= now {
                    *next_due = now + slot.period;
                }
            }
            if let Some(callback) = slot.callback.lock().as_mut() {
                callback();
            }
        }
    }
}
