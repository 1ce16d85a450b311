//! # Logical Clock and Cadences
//!
//! Every periodic activity (sampling, display rotation, heartbeat sends) is a
//! [`Cadence`]: a fixed interval plus the next time it is due, measured on a
//! monotonic [`Clock`]. The control loop polls each cadence once per iteration
//! and sleeps until the earliest one is due.
//!
//! [`ManualClock`] lets tests move time forward explicitly; its `sleep` simply
//! advances the clock, so blocking delays (reconnect back-off, idle waits) cost
//! nothing in a test run.

use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source measured from an arbitrary origin.
pub trait Clock {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Block the caller for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real time, backed by [`Instant`] and [`thread::sleep`].
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Hand-driven clock for tests and simulations.
///
/// Clones share the same underlying time, so a meter, the agent and the test body
/// can all hold a handle and observe the same instant.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// A fixed-interval timer represented as "next due time".
///
/// Due times stay on a fixed grid (`start + k * interval`). When the loop falls
/// behind, for example during a blocking send, the cadence fires once and skips
/// the ticks it missed rather than replaying them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    interval: Duration,
    next_due: Duration,
}

impl Cadence {
    /// First tick one interval after `start`
    pub fn new(interval: Duration, start: Duration) -> Self {
        Self {
            interval,
            next_due: start + interval,
        }
    }

    /// First tick at `start` itself
    pub fn immediate(interval: Duration, start: Duration) -> Self {
        Self {
            interval,
            next_due: start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Duration {
        self.next_due
    }

    /// Time left until the next tick (zero if already due)
    pub fn remaining(&self, now: Duration) -> Duration {
        self.next_due.saturating_sub(now)
    }

    /// Returns true if the cadence is due at `now`, advancing it past `now`.
    pub fn poll(&mut self, now: Duration) -> bool {
        if now < self.next_due {
            return false;
        }

        if self.interval.is_zero() {
            self.next_due = now;
            return true;
        }

        let behind = (now - self.next_due).as_nanos();
        let steps = behind / self.interval.as_nanos() + 1;
        let advance = self.interval.as_nanos().saturating_mul(steps);
        self.next_due += Duration::from_nanos(u64::try_from(advance).unwrap_or(u64::MAX));
        true
    }
}
