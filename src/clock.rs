//! Virtual time.
//!
//! The server never looks at the system clock for scheduling. An external
//! scheduler owns a [`Clock`] and advances it between calls to
//! `Server::service`; idle timers measure against that clock only. Tests
//! can therefore expire timeouts instantly, and a simulation can slow the
//! whole server down without touching any code.
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// A monotonically non-decreasing instant, advanced externally.
///
/// `Clock` is a cheap handle: clones share the same underlying instant, so
/// every timer constructed from a clone follows the same time base.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    now: Rc<Cell<Duration>>,
}

impl Clock {
    /// A new clock, starting at zero.
    pub fn new() -> Clock {
        Clock::default()
    }

    /// The current instant.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Moves time forward. This is the only mutation; time never goes back.
    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

/// A one-shot deadline measured against a [`Clock`].
#[derive(Clone, Debug)]
pub struct Timer {
    clock: Clock,
    start: Duration,
    duration: Duration,
}

impl Timer {
    /// A timer armed now, expiring after `duration`.
    pub fn new(clock: Clock, duration: Duration) -> Timer {
        let start = clock.now();
        Timer {
            clock: clock,
            start: start,
            duration: duration,
        }
    }

    /// True once `duration` has elapsed since the last (re)start.
    pub fn expired(&self) -> bool {
        self.clock.now() - self.start >= self.duration
    }

    /// Re-arms the timer at the current instant.
    pub fn restart(&mut self) {
        self.start = self.clock.now();
    }

    /// Retargets the duration and re-arms.
    pub fn restart_with(&mut self, duration: Duration) {
        self.duration = duration;
        self.restart();
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
