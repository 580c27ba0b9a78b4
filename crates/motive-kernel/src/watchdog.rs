//! [`ConnectionWatchdog`] – controller link health monitor.
//!
//! The control cycle calls [`ConnectionWatchdog::heartbeat`] for every valid
//! frame it receives and [`ConnectionWatchdog::check`] once per iteration.
//! The watchdog reports edges only: one [`LinkTransition::Lost`] when the
//! line has been silent for longer than the timeout, and one
//! [`LinkTransition::Restored`] when frames flow again.

use std::time::{Duration, Instant};

/// Health of the controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// A valid frame arrived within the timeout.
    Healthy,
    /// No valid frame within the timeout.
    TimedOut,
}

/// A change in [`LinkHealth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    Lost { silent_for: Duration },
    Restored,
}

/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use motive_kernel::watchdog::{ConnectionWatchdog, LinkHealth, LinkTransition};
///
/// let start = Instant::now();
/// let mut wd = ConnectionWatchdog::new(Duration::from_millis(500), start);
/// assert_eq!(wd.check(start + Duration::from_millis(100)), None);
///
/// let later = start + Duration::from_secs(1);
/// assert!(matches!(wd.check(later), Some(LinkTransition::Lost { .. })));
/// assert_eq!(wd.health(), LinkHealth::TimedOut);
/// assert_eq!(wd.heartbeat(later), Some(LinkTransition::Restored));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionWatchdog {
    timeout: Duration,
    last_heartbeat: Instant,
    lost: bool,
}

impl ConnectionWatchdog {
    /// Start watching; the link counts as healthy as of `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_heartbeat: now,
            lost: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a valid frame.  Returns [`LinkTransition::Restored`] if the
    /// link had been declared lost.
    pub fn heartbeat(&mut self, now: Instant) -> Option<LinkTransition> {
        self.last_heartbeat = now;
        if self.lost {
            self.lost = false;
            Some(LinkTransition::Restored)
        } else {
            None
        }
    }

    /// Returns [`LinkTransition::Lost`] the first time the silence exceeds
    /// the timeout.
    pub fn check(&mut self, now: Instant) -> Option<LinkTransition> {
        let silent_for = self.silent_for(now);
        if !self.lost && silent_for > self.timeout {
            self.lost = true;
            return Some(LinkTransition::Lost { silent_for });
        }
        None
    }

    pub fn health(&self) -> LinkHealth {
        if self.lost {
            LinkHealth::TimedOut
        } else {
            LinkHealth::Healthy
        }
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    /// Forget any past silence, e.g. after reconnecting.
    pub fn reset(&mut self, now: Instant) {
        self.last_heartbeat = now;
        self.lost = false;
    }
}
