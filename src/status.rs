//! Status reporting
//!
//! Each publish sends two retained messages: the relay state snapshot on
//! `<thing>/state`, then the liveness token on `<thing>/heartbeat`. Retaining
//! both means a dashboard subscribing late still sees the last known state.

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tracing::{debug, info};

use crate::mqtt::Topics;
use crate::relay::{RelayBank, RelayState};
use crate::session::{SessionError, SessionManager};
use crate::timer::Interval;

pub const HEARTBEAT_TOKEN: &[u8] = b"alive";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no broker session")]
    NotConnected,

    #[error("could not serialize status: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Session(SessionError),

    #[error("only the {sent} message went out: {source}")]
    Partial {
        sent: &'static str,
        source: SessionError,
    },
}

impl From<SessionError> for PublishError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotConnected => PublishError::NotConnected,
            other => PublishError::Session(other),
        }
    }
}

/// Point-in-time view of the bank, serialized as
/// `{"thing_name": .., "channel1": 0|1, .., "timestamp": <ms since boot>}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot<'a> {
    pub thing_name: &'a str,
    pub channels: Vec<(u8, RelayState)>,
    pub timestamp: u64,
}

impl<'a> StatusSnapshot<'a> {
    pub fn capture(thing_name: &'a str, relays: &RelayBank, timestamp: u64) -> Self {
        Self {
            thing_name,
            channels: relays.snapshot(),
            timestamp,
        }
    }
}

impl Serialize for StatusSnapshot<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.channels.len() + 2))?;
        map.serialize_entry("thing_name", self.thing_name)?;
        for (id, state) in &self.channels {
            map.serialize_entry(&format!("channel{}", id), &state.as_bit())?;
        }
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

pub struct StatusPublisher {
    thing_name: String,
    topics: Topics,
    schedule: Interval,
}

impl StatusPublisher {
    /// The first scheduled publish is one interval after `now`.
    pub fn new(thing_name: &str, interval_ms: u64, now: u64) -> Self {
        Self {
            thing_name: thing_name.to_string(),
            topics: Topics::for_thing(thing_name),
            schedule: Interval::starting_at(interval_ms, now),
        }
    }

    pub fn due(&self, now: u64) -> bool {
        self.schedule.is_ready(now)
    }

    /// Publishes if the interval elapsed, re-arming the schedule either way.
    ///
    /// Returns `None` when nothing was due.
    pub fn publish_if_due(
        &mut self,
        session: &mut SessionManager,
        relays: &RelayBank,
        now: u64,
    ) -> Option<Result<(), PublishError>> {
        if !self.schedule.fire_if_ready(now) {
            return None;
        }
        Some(self.publish(session, relays, now))
    }

    /// Publishes state and heartbeat now. Leaves the schedule alone.
    pub fn publish(
        &self,
        session: &mut SessionManager,
        relays: &RelayBank,
        now: u64,
    ) -> Result<(), PublishError> {
        if !session.state().is_connected() {
            debug!("Status publish skipped, no broker session");
            return Err(PublishError::NotConnected);
        }

        let snapshot = StatusSnapshot::capture(&self.thing_name, relays, now);
        let payload = serde_json::to_vec(&snapshot)?;
        // the heartbeat goes out even when the state publish fails
        let state_sent = session.publish(&self.topics.state, payload, true);
        let heartbeat_sent =
            session.publish(&self.topics.heartbeat, HEARTBEAT_TOKEN.to_vec(), true);
        match (state_sent, heartbeat_sent) {
            (Ok(()), Ok(())) => {}
            (Err(source), Ok(())) => {
                return Err(PublishError::Partial {
                    sent: "heartbeat",
                    source,
                })
            }
            (Ok(()), Err(source)) => {
                return Err(PublishError::Partial {
                    sent: "state",
                    source,
                })
            }
            (Err(source), Err(_)) => return Err(source.into()),
        }
        info!(
            "Published status: {}",
            snapshot
                .channels
                .iter()
                .map(|(id, state)| format!("ch{}={}", id, state))
                .collect::<Vec<_>>()
                .join(" ")
        );
        Ok(())
    }
}
