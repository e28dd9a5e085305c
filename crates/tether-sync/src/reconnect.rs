//! # Reconnect State
//!
//! Backoff bookkeeping for the manager: an attempt counter and at most one
//! pending retry deadline.
//!
//! ## Schedule
//! ```text
//! attempt:   1    2    3    4  ...   9     10    11    ...
//! delay:     1s   2s   4s   8s ... 256s   300s  300s   (forever)
//! ```
//!
//! The counter is uncapped; only the delay is clamped. Scheduling while a
//! retry is pending replaces it.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::time::Instant;

/// Roughly 30 years, used when a configured delay would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, clamped to a far-future deadline instead of overflowing.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// A scheduled retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    /// When the retry fires.
    pub deadline: Instant,
    /// Delay that produced `deadline`.
    pub delay: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Attempt counter plus the single pending retry.
pub struct ReconnectState {
    attempts: u32,
    pending: Option<PendingReconnect>,
    backoff: ExponentialBackoff,
    max_delay: Duration,
}

impl ReconnectState {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        ReconnectState {
            attempts: 0,
            pending: None,
            backoff: ExponentialBackoff {
                current_interval: base_delay,
                initial_interval: base_delay,
                randomization_factor: 0.0,
                multiplier: 2.0,
                max_interval: max_delay,
                max_elapsed_time: None,
                ..Default::default()
            },
            max_delay,
        }
    }

    /// Number of retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn pending(&self) -> Option<PendingReconnect> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Back to `{0, none}`.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = None;
        self.backoff.reset();
    }

    /// Schedules the next retry, replacing any pending one.
    pub fn schedule(&mut self, now: Instant) -> PendingReconnect {
        // max_elapsed_time is None, so the policy never runs dry.
        let delay = self.backoff.next_backoff().unwrap_or(self.max_delay);
        self.attempts = self.attempts.saturating_add(1);

        let pending = PendingReconnect {
            deadline: deadline_after(now, delay),
            delay,
            attempt: self.attempts,
        };
        self.pending = Some(pending);
        pending
    }

    /// Takes the pending retry if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<PendingReconnect> {
        match self.pending {
            Some(pending) if pending.deadline <= now => self.pending.take(),
            _ => None,
        }
    }
}
