//! Wall-clock plausibility
//!
//! Certificate validity is checked against the wall clock. A device that has
//! not synchronised its clock yet (still near the epoch) fails every TLS
//! handshake, so the session manager refuses to connect until the clock
//! reports a time at or after a fixed threshold and asks for a resync instead.

use chrono::{DateTime, Utc};
use tracing::warn;

pub trait TimeSource: Send {
    /// Seconds since the Unix epoch according to the wall clock.
    fn unix_time(&self) -> i64;

    /// Signals that the clock still needs synchronising. Must not block.
    ///
    /// Implementations may kick a time service or only record the request.
    fn request_resync(&mut self);
}

pub fn is_plausible(unix_time: i64, min_plausible_epoch: i64) -> bool {
    unix_time >= min_plausible_epoch
}

/// The system wall clock, synchronised by the host's NTP client.
///
/// The process cannot start that client itself. A resync request is only
/// counted and logged while the host catches up.
#[derive(Debug, Default)]
pub struct SystemClock {
    resync_requests: u64,
}

impl SystemClock {
    pub fn resync_requests(&self) -> u64 {
        self.resync_requests
    }
}

impl TimeSource for SystemClock {
    fn unix_time(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn request_resync(&mut self) {
        self.resync_requests += 1;
        let now: DateTime<Utc> = Utc::now();
        warn!(
            "System clock reads {}, waiting for the host NTP client (request #{})",
            now.to_rfc3339(),
            self.resync_requests
        );
    }
}
