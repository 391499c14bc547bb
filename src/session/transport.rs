//! Seam between the session state machine and the TLS + MQTT client

use crate::credentials::CredentialBundle;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Everything the transport needs to open a session
#[derive(Debug)]
pub struct ConnectRequest<'a> {
    pub client_id: &'a str,
    pub endpoint: &'a str,
    pub port: u16,
    pub keep_alive: Duration,
    /// Always false: the broker keeps our subscription across reconnects
    pub clean_session: bool,
    pub credentials: &'a CredentialBundle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// Broker resumed a stored session for this client id
    pub session_present: bool,
}

/// A publish frame received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("broker refused connection: {0}")]
    Refused(String),

    #[error("broker rejected subscription to {0}")]
    SubscribeRejected(String),

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("no open session")]
    NotConnected,
}

impl TransportError {
    /// Whether the error means the session is gone, as opposed to one
    /// request failing on a live session.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_)
                | TransportError::SessionLost(_)
                | TransportError::NotConnected
        )
    }
}

/// A secured publish/subscribe session with the broker.
///
/// Implementations may block inside `connect` and `subscribe`; the session
/// manager bounds both with its own timeouts.
#[async_trait]
pub trait Transport: Send {
    /// Performs the TLS handshake and protocol-level connect.
    async fn connect(
        &mut self,
        request: &ConnectRequest<'_>,
    ) -> Result<ConnectOutcome, TransportError>;

    /// Subscribes at QoS 1 and waits for the acknowledgement.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Services the connection for a short window, returning at most one
    /// inbound publish. An error means the session is no longer alive.
    async fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError>;

    /// Queues a QoS 1 publish; it is flushed by the next `poll`.
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;

    /// Closes the session if one is open.
    async fn disconnect(&mut self);
}
