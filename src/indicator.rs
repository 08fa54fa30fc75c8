//! Request state machine and the LED indicator that displays it.
//!
//! The interest call is the only writer of Idle→Waiting→Ready/Idle; the
//! indicator thread only reads it, except for the Ready→Idle reset after
//! `ready_cycles` slow blinks. Transitions are single atomic stores, so
//! readers never lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

use crate::config::IndicatorConfig;
use crate::error::{Error, Result};

/// Lifecycle of the outstanding content request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Idle = 0,
    Waiting = 1,
    Ready = 2,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RequestState::Waiting,
            2 => RequestState::Ready,
            _ => RequestState::Idle,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    state: AtomicU8,
    /// Bumped on every interest, so the indicator can tell a fresh Ready
    /// from the one it has been counting.
    generation: AtomicU64,
}

/// Shared request state. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    inner: Arc<TrackerInner>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Interest sent: → Waiting.
    pub fn begin(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner
            .state
            .store(RequestState::Waiting as u8, Ordering::Release);
    }

    /// Content received: → Ready when non-empty, else → Idle.
    pub fn complete(&self, content_len: usize) -> RequestState {
        let next = if content_len > 0 {
            RequestState::Ready
        } else {
            RequestState::Idle
        };
        self.inner.state.store(next as u8, Ordering::Release);
        next
    }

    /// Request failed before any content arrived: → Idle.
    pub fn abort(&self) {
        self.inner
            .state
            .store(RequestState::Idle as u8, Ordering::Release);
    }

    /// Ready → Idle, unless a request newer than `generation` began since.
    fn expire(&self, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        self.inner
            .state
            .compare_exchange(
                RequestState::Ready as u8,
                RequestState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Two on/off outputs.
pub trait LedDriver: Send + 'static {
    fn set_red(&self, on: bool);
    fn set_green(&self, on: bool);
}

/// In-memory LEDs; clones share state.
#[derive(Debug, Clone, Default)]
pub struct SharedLeds {
    red: Arc<AtomicBool>,
    green: Arc<AtomicBool>,
}

impl SharedLeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn red(&self) -> bool {
        self.red.load(Ordering::Relaxed)
    }

    pub fn green(&self) -> bool {
        self.green.load(Ordering::Relaxed)
    }
}

impl LedDriver for SharedLeds {
    fn set_red(&self, on: bool) {
        self.red.store(on, Ordering::Relaxed);
    }

    fn set_green(&self, on: bool) {
        self.green.store(on, Ordering::Relaxed);
    }
}

/// Blinks the LEDs according to the request state.
///
/// | State   | Pattern                      |
/// |---------|------------------------------|
/// | Idle    | green, fast                  |
/// | Waiting | red, fast                    |
/// | Ready   | green, slow; Idle after N    |
pub struct Indicator<L: LedDriver> {
    tracker: RequestTracker,
    leds: L,
    fast: Duration,
    slow: Duration,
    ready_cycles: u32,
    ready_seen: u32,
    counted_generation: u64,
}

impl<L: LedDriver> Indicator<L> {
    pub fn new(tracker: RequestTracker, leds: L, config: &IndicatorConfig) -> Self {
        Self {
            tracker,
            leds,
            fast: Duration::from_millis(config.fast_ms),
            slow: Duration::from_millis(config.slow_ms),
            ready_cycles: config.ready_cycles,
            ready_seen: 0,
            counted_generation: 0,
        }
    }

    /// Run one blink cycle, pausing with `pause` between LED changes.
    ///
    /// Returns the state the cycle displayed.
    pub fn step(&mut self, mut pause: impl FnMut(Duration)) -> RequestState {
        let state = self.tracker.state();
        match state {
            RequestState::Idle => {
                self.ready_seen = 0;
                self.blink(false, self.fast, &mut pause);
            }
            RequestState::Waiting => {
                self.ready_seen = 0;
                self.blink(true, self.fast, &mut pause);
            }
            RequestState::Ready => {
                let generation = self.tracker.generation();
                if generation != self.counted_generation {
                    self.counted_generation = generation;
                    self.ready_seen = 0;
                }
                self.blink(false, self.slow, &mut pause);
                if self.tracker.generation() != self.counted_generation {
                    // New request during the blink; count it from the next cycle
                    return state;
                }
                self.ready_seen += 1;
                if self.ready_seen >= self.ready_cycles {
                    self.ready_seen = 0;
                    if self.tracker.expire(self.counted_generation) {
                        log::debug!("Indicator: Ready shown {} cycles, back to Idle", self.ready_cycles);
                    }
                }
            }
        }
        state
    }

    fn blink(&self, red: bool, half_period: Duration, pause: &mut impl FnMut(Duration)) {
        if red {
            self.leds.set_green(false);
            self.leds.set_red(true);
        } else {
            self.leds.set_red(false);
            self.leds.set_green(true);
        }
        pause(half_period);
        self.leds.set_red(false);
        self.leds.set_green(false);
        pause(half_period);
    }

    /// Run on a named thread until the handle is stopped.
    pub fn spawn(mut self) -> Result<IndicatorHandle> {
        let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);
        let join = thread::Builder::new()
            .name("blinker".to_string())
            .spawn(move || {
                log::debug!("Indicator running");
                loop {
                    self.step(|d| {
                        let _ = stop_rx.recv_timeout(d);
                    });
                    if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                        break;
                    }
                }
                self.leds.set_red(false);
                self.leds.set_green(false);
                log::debug!("Indicator stopped");
            })
            .map_err(|e| Error::ResourceExhausted(format!("failed to spawn blinker: {}", e)))?;

        Ok(IndicatorHandle {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }
}

/// Running indicator thread.
pub struct IndicatorHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl IndicatorHandle {
    /// Interrupt the current pause and join the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the pause immediately
        self.stop.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Indicator thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

impl Drop for IndicatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
