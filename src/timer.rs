//! Polling timers for the cooperative loop
//!
//! The control loop never sleeps on a per-purpose timer. Instead every
//! periodic duty (status publishing, reconnect backoff) asks once per tick
//! whether its interval has passed. All timestamps are milliseconds on the
//! monotonic uptime clock.

use tokio::time::Instant;

/// Returns true when at least `interval` ms have passed since `last_fire`.
///
/// Saturates instead of wrapping, so a `now` that is behind `last_fire`
/// never reports the interval as elapsed.
pub fn elapsed(last_fire: u64, interval: u64, now: u64) -> bool {
    now.saturating_sub(last_fire) >= interval
}

/// Interval gate remembering when it last fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    period_ms: u64,
    last_fire: Option<u64>,
}

impl Interval {
    /// Gate that fires on the first check, then once per period.
    pub fn immediate(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_fire: None,
        }
    }

    /// Gate whose first firing is one full period after `now`.
    pub fn starting_at(period_ms: u64, now: u64) -> Self {
        Self {
            period_ms,
            last_fire: Some(now),
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Whether the gate would fire at `now`, without consuming it.
    pub fn is_ready(&self, now: u64) -> bool {
        match self.last_fire {
            Some(last) => elapsed(last, self.period_ms, now),
            None => true,
        }
    }

    /// Fires (and re-arms) if the period has elapsed.
    pub fn fire_if_ready(&mut self, now: u64) -> bool {
        if self.is_ready(now) {
            self.last_fire = Some(now);
            true
        } else {
            false
        }
    }

    /// Milliseconds until the gate fires again, zero if it is ready.
    pub fn remaining(&self, now: u64) -> u64 {
        match self.last_fire {
            Some(last) => last.saturating_add(self.period_ms).saturating_sub(now),
            None => 0,
        }
    }
}

/// Monotonic milliseconds since the process started.
#[derive(Debug, Clone, Copy)]
pub struct Uptime {
    boot: Instant,
}

impl Uptime {
    pub fn start() -> Self {
        Self {
            boot: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
