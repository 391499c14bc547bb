//! # Session Management
//!
//! Everything between "the device has power" and "commands arrive from the
//! broker": network availability, wall-clock sanity, the TLS-secured MQTT
//! session and the command subscription.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── state.rs      - Connectivity / SessionPhase / Subscription tuple
//! ├── manager.rs    - SessionManager, the per-tick state machine
//! ├── transport.rs  - Transport trait (TLS + MQTT client seam)
//! ├── network.rs    - NetworkLink trait and HostNetwork
//! └── clock.rs      - TimeSource trait and SystemClock
//! ```
//!
//! The collaborators behind the three traits are external: the platform
//! network stack, the time-synchronisation service and the MQTT client
//! library. Production implementations live in [`network::HostNetwork`],
//! [`clock::SystemClock`] and [`crate::mqtt::MqttTransport`].
//!
//! ## Recovery
//!
//! There is no terminal state. Lost network, a dropped session or a refused
//! connect all land back in `Disconnected` through the single reset
//! transition in [`state::SessionState`], and the next tick starts over.

pub mod clock;
pub mod manager;
#[cfg(test)]
pub(crate) mod mock;
pub mod network;
pub mod state;
pub mod transport;

use thiserror::Error;

pub use clock::{SystemClock, TimeSource};
pub use manager::{Collaborators, SessionManager, TickOutcome};
pub use network::{HostNetwork, NetworkError, NetworkLink};
pub use state::{Connectivity, SessionPhase, SessionState, Subscription};
pub use transport::{ConnectOutcome, ConnectRequest, InboundMessage, Transport, TransportError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no broker session")]
    NotConnected,

    #[error("cannot {action} from state {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
