//! Pulse clock generation thread.
//!
//! Follows the transport: while it plays, the thread emits [`ClockMessage::Pulse`]
//! at 24 per quarter note of the effective tempo; Start, Continue and Stop
//! bracket each run. Messages go into a wake-on-write drain queue for a
//! hardware delivery thread.
//!
//! Each deadline is reached by sleeping until `spin_window_us` before it and
//! busy-waiting the rest. The spin is capped at twice the window. While
//! slaved to a locked external clock, each interval is nudged by a single
//! proportional term toward the external pulse grid.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use metrum_core::recovery::bpm_to_interval;
use metrum_core::ring::{drain_queue, DrainConsumer, DrainProducer};
use metrum_core::{
    AtomicCounter, AtomicFlag, ClockConfig, HostClock, SharedClockEstimate, SyncSource,
    TransportManager,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMessage {
    Pulse { time_us: u64 },
    Start,
    Continue,
    Stop,
}

enum Control {
    /// Re-check the transport now instead of at the next idle poll.
    Wake,
    Shutdown,
}

/// Interval to the next pulse: the nominal interval at `tempo` minus
/// `gain * phase_error_us`, the correction clamped to `max_correction` of the
/// nominal interval. Positive error means the generator is late.
#[inline]
pub fn next_interval_us(tempo: f64, phase_error_us: f64, gain: f64, max_correction: f64) -> f64 {
    let nominal = bpm_to_interval(tempo);
    let limit = nominal * max_correction;
    nominal - (gain * phase_error_us).clamp(-limit, limit)
}

/// Signed distance from `deadline_us` to the nearest pulse on the grid
/// `reference_us + k * interval_us`, in `(-interval/2, interval/2]`.
#[inline]
pub fn phase_error_us(deadline_us: u64, reference_us: u64, interval_us: f64) -> f64 {
    if !(interval_us > 0.0) {
        return 0.0;
    }
    let offset = (deadline_us as f64 - reference_us as f64).rem_euclid(interval_us);
    if offset > interval_us / 2.0 {
        offset - interval_us
    } else {
        offset
    }
}

struct Worker {
    config: ClockConfig,
    manager: Arc<TransportManager>,
    estimate: Arc<SharedClockEstimate>,
    host_clock: Arc<dyn HostClock>,
    control: Receiver<Control>,
    output: DrainProducer<ClockMessage>,
    pulses: Arc<AtomicCounter>,
}

enum Wait {
    Reached,
    Woken,
    Shutdown,
}

impl Worker {
    fn run(&mut self) {
        let idle = Duration::from_millis(self.config.idle_poll_ms);
        let mut clocking = false;
        let mut resume = false;
        let mut deadline = 0u64;
        let state = Arc::clone(self.manager.state());

        loop {
            if !clocking {
                match self.control.recv_timeout(idle) {
                    Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(Control::Wake) | Err(RecvTimeoutError::Timeout) => {}
                }
                if state.is_playing() {
                    let message = if resume {
                        ClockMessage::Continue
                    } else {
                        ClockMessage::Start
                    };
                    self.output.push(message);
                    clocking = true;
                    deadline = self.host_clock.now_us();
                } else {
                    resume = state.is_paused();
                }
                continue;
            }

            if !state.is_playing() {
                self.output.push(ClockMessage::Stop);
                clocking = false;
                resume = state.is_paused();
                continue;
            }

            match self.wait_until(deadline) {
                Wait::Shutdown => break,
                Wait::Woken => continue,
                Wait::Reached => {}
            }

            self.output.push(ClockMessage::Pulse { time_us: deadline });
            self.pulses.increment();

            let tempo = state.tempo() as f64;
            let error = self.phase_error(deadline, tempo);
            let interval = next_interval_us(
                tempo,
                error,
                self.config.phase_gain,
                self.config.max_correction,
            );
            deadline += interval.max(1.0) as u64;

            // After a stall, resume from now rather than bursting to catch up.
            let now = self.host_clock.now_us();
            if now > deadline + interval as u64 {
                deadline = now;
            }
        }

        if clocking {
            self.output.push(ClockMessage::Stop);
        }
        self.output.wake();
    }

    fn phase_error(&self, deadline: u64, tempo: f64) -> f64 {
        let slaved = self.manager.sync_source() == SyncSource::ExternalClock;
        if !slaved || !self.estimate.is_locked() {
            return 0.0;
        }
        phase_error_us(
            deadline,
            self.estimate.last_pulse_us(),
            bpm_to_interval(tempo),
        )
    }

    fn wait_until(&self, deadline: u64) -> Wait {
        let spin_window = self.config.spin_window_us;
        loop {
            let now = self.host_clock.now_us();
            if now >= deadline {
                return Wait::Reached;
            }
            let remaining = deadline - now;
            if remaining <= spin_window {
                break;
            }
            let sleep = Duration::from_micros(remaining - spin_window);
            match self.control.recv_timeout(sleep) {
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    return Wait::Shutdown
                }
                Ok(Control::Wake) => return Wait::Woken,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        let spin_limit = self.host_clock.now_us() + spin_window * 2;
        loop {
            let now = self.host_clock.now_us();
            if now >= deadline || now >= spin_limit {
                return Wait::Reached;
            }
            std::hint::spin_loop();
        }
    }
}

/// Owner of the pulse clock thread.
pub struct ClockGenerator {
    config: ClockConfig,
    manager: Arc<TransportManager>,
    estimate: Arc<SharedClockEstimate>,
    host_clock: Arc<dyn HostClock>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    /// Returned by the thread on exit so the generator can be restarted.
    output: Option<DrainProducer<ClockMessage>>,
    handle: Option<JoinHandle<DrainProducer<ClockMessage>>>,
    exited_rx: Option<Receiver<()>>,
    running: AtomicFlag,
    pulses: Arc<AtomicCounter>,
}

impl ClockGenerator {
    /// Create a stopped generator and the queue its messages arrive on.
    pub fn new(
        config: ClockConfig,
        manager: Arc<TransportManager>,
        estimate: Arc<SharedClockEstimate>,
        host_clock: Arc<dyn HostClock>,
    ) -> Result<(Self, DrainConsumer<ClockMessage>)> {
        config
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let (output, consumer) = drain_queue(config.queue_capacity);
        let (control_tx, control_rx) = bounded(16);
        let generator = Self {
            config,
            manager,
            estimate,
            host_clock,
            control_tx,
            control_rx,
            output: Some(output),
            handle: None,
            exited_rx: None,
            running: AtomicFlag::new(false),
            pulses: Arc::new(AtomicCounter::new()),
        };
        Ok((generator, consumer))
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::AlreadyRunning);
        }
        // Detached after a stop timeout; the old thread still owns the queue.
        let Some(output) = self.output.take() else {
            return Err(Error::AlreadyRunning);
        };

        let (exited_tx, exited_rx) = bounded(1);
        let mut worker = Worker {
            config: self.config.clone(),
            manager: Arc::clone(&self.manager),
            estimate: Arc::clone(&self.estimate),
            host_clock: Arc::clone(&self.host_clock),
            control: self.control_rx.clone(),
            output,
            pulses: Arc::clone(&self.pulses),
        };

        let handle = thread::Builder::new()
            .name("metrum-clock".into())
            .spawn(move || {
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max) {
                    warn!(error = ?e, "clock thread running without elevated priority");
                }
                worker.run();
                let _ = exited_tx.send(());
                worker.output
            })?;

        self.handle = Some(handle);
        self.exited_rx = Some(exited_rx);
        self.running.set(true);
        debug!("clock generator started");
        Ok(())
    }

    /// Nudge the thread to notice a transport change before its next idle
    /// poll.
    pub fn wake(&self) {
        let _ = self.control_tx.try_send(Control::Wake);
    }

    /// Ask the thread to exit. Returns `false` if it did not finish within
    /// `timeout`; it is then detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.control_tx.send(Control::Shutdown);
        self.running.set(false);

        let exited = match self.exited_rx.take() {
            Some(rx) => !matches!(rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        };
        if !exited {
            warn!(?timeout, "clock generator did not stop in time");
            return false;
        }

        match handle.join() {
            Ok(output) => {
                self.output = Some(output);
                // Drop any leftover control messages from this run.
                while self.control_rx.try_recv().is_ok() {}
                debug!("clock generator stopped");
                true
            }
            Err(_) => {
                warn!("clock generator thread panicked");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Pulses emitted since construction.
    pub fn pulse_count(&self) -> u64 {
        self.pulses.get()
    }
}

impl Drop for ClockGenerator {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}
