//! The three-part session state and its transitions
//!
//! ```text
//!  connectivity   Down ──link up──► Up
//!                   ▲                │
//!                   └───link lost────┤ (also resets session + subscription)
//!                                    ▼
//!  session   Disconnected ──begin──► Connecting ──ok──► Connected
//!                 ▲                       │                 │
//!                 └────────failed─────────┘                 │
//!                 └─────────────────reset───────────────────┘
//!
//!  subscription   NotSubscribed ──suback──► Subscribed   (reset with session)
//! ```
//!
//! Invariants held by every transition:
//! - `Connected` implies `Up`
//! - `Subscribed` implies `Connected`

use super::SessionError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    NotSubscribed,
    Subscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    connectivity: Connectivity,
    phase: SessionPhase,
    subscription: Subscription,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Down,
            phase: SessionPhase::Disconnected,
            subscription: Subscription::NotSubscribed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}/{:?}",
            self.connectivity, self.phase, self.subscription
        )
    }
}

impl SessionState {
    pub fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription
    }

    pub fn is_connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription == Subscription::Subscribed
    }

    pub fn link_up(&mut self) {
        self.connectivity = Connectivity::Up;
    }

    /// Network gone: everything above it is gone too.
    pub fn link_lost(&mut self) {
        self.connectivity = Connectivity::Down;
        self.reset();
    }

    /// Session gone while the network may still be up.
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Disconnected;
        self.subscription = Subscription::NotSubscribed;
    }

    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        match (self.connectivity, self.phase) {
            (Connectivity::Up, SessionPhase::Disconnected) => {
                self.phase = SessionPhase::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("begin connect")),
        }
    }

    pub fn connect_succeeded(&mut self) -> Result<(), SessionError> {
        match (self.connectivity, self.phase) {
            (Connectivity::Up, SessionPhase::Connecting) => {
                self.phase = SessionPhase::Connected;
                Ok(())
            }
            _ => Err(self.invalid("complete connect")),
        }
    }

    pub fn connect_failed(&mut self) {
        self.reset();
    }

    pub fn subscribed(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Connected {
            return Err(self.invalid("subscribe"));
        }
        self.subscription = Subscription::Subscribed;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: *self,
            action,
        }
    }

    #[cfg(test)]
    pub(crate) fn holds_invariants(&self) -> bool {
        let connected_implies_up =
            self.phase != SessionPhase::Connected || self.connectivity == Connectivity::Up;
        let subscribed_implies_connected =
            self.subscription != Subscription::Subscribed || self.phase == SessionPhase::Connected;
        connected_implies_up && subscribed_implies_connected
    }
}
