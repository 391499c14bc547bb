//! Connectivity state machine
//!
//! [`SessionManager::tick`] is called once per loop iteration and performs at
//! most one step of work, chosen from the current [`SessionState`]:
//!
//! | State                       | Step                                         |
//! |-----------------------------|----------------------------------------------|
//! | Down                        | bring the network up (bounded)               |
//! | Up, Disconnected            | clock check, then connect (backoff-gated)    |
//! | Up, Connected, unsubscribed | subscribe to the command topic               |
//! | Up, Connected, subscribed   | service the transport, hand back a command   |
//!
//! Nothing here is fatal. Every failure leaves the machine in a state from
//! which the next tick retries.

use super::clock::{is_plausible, TimeSource};
use super::network::NetworkLink;
use super::state::{Connectivity, SessionPhase, SessionState};
use super::transport::{ConnectRequest, InboundMessage, Transport};
use super::SessionError;
use crate::config::DeviceConfig;
use crate::credentials::CredentialBundle;
use crate::mqtt::Topics;
use crate::timer::Interval;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// What a tick produced for the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    /// The command subscription was (re)established this tick
    Subscribed,
    /// A frame arrived on the command topic
    Command(InboundMessage),
}

/// The external collaborators a session runs on
pub struct Collaborators {
    pub transport: Box<dyn Transport>,
    pub link: Box<dyn NetworkLink>,
    pub clock: Box<dyn TimeSource>,
}

pub struct SessionManager {
    state: SessionState,
    transport: Box<dyn Transport>,
    link: Box<dyn NetworkLink>,
    clock: Box<dyn TimeSource>,
    credentials: CredentialBundle,
    client_id: String,
    endpoint: String,
    port: u16,
    keep_alive: Duration,
    connect_timeout: Duration,
    subscribe_timeout: Duration,
    min_plausible_epoch: i64,
    topics: Topics,
    connect_backoff: Interval,
}

impl SessionManager {
    pub fn new(
        config: &DeviceConfig,
        credentials: CredentialBundle,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            state: SessionState::default(),
            transport: collaborators.transport,
            link: collaborators.link,
            clock: collaborators.clock,
            credentials,
            client_id: config.thing_name.clone(),
            endpoint: config.broker.endpoint.clone(),
            port: config.broker.port,
            keep_alive: config.broker.keep_alive(),
            connect_timeout: config.broker.connect_timeout(),
            subscribe_timeout: config.broker.subscribe_timeout(),
            min_plausible_epoch: config.clock.min_plausible_epoch,
            topics: Topics::for_thing(&config.thing_name),
            connect_backoff: Interval::immediate(config.broker.retry_interval_ms),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Runs one step of the state machine.
    pub async fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if self.state.connectivity() == Connectivity::Up && !self.link.is_up() {
            warn!("Network link lost ({})", self.state);
            self.drop_link().await;
            return TickOutcome::Idle;
        }

        match (self.state.connectivity(), self.state.phase()) {
            (Connectivity::Down, _) => {
                self.establish_link().await;
                TickOutcome::Idle
            }
            (Connectivity::Up, SessionPhase::Disconnected | SessionPhase::Connecting) => {
                self.try_connect(now_ms).await;
                TickOutcome::Idle
            }
            (Connectivity::Up, SessionPhase::Connected) if !self.state.is_subscribed() => {
                self.try_subscribe().await
            }
            (Connectivity::Up, SessionPhase::Connected) => self.service().await,
        }
    }

    /// Queues a publish. Fails with `NotConnected` outside a live session.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), SessionError> {
        if !self.state.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.transport.publish(topic, payload, retain)?;
        Ok(())
    }

    /// Closes the session cleanly, if one is open.
    pub async fn shutdown(&mut self) {
        if self.state.is_connected() {
            info!("Closing broker session");
            self.transport.disconnect().await;
        }
        self.state.reset();
    }

    async fn establish_link(&mut self) {
        match self.link.bring_up().await {
            Ok(()) => {
                self.state.link_up();
                info!("Network connectivity established");
            }
            Err(e) => warn!("Network unavailable: {}", e),
        }
    }

    async fn try_connect(&mut self, now_ms: u64) {
        if !self.connect_backoff.fire_if_ready(now_ms) {
            debug!(
                "Connect backoff, next attempt in {}ms",
                self.connect_backoff.remaining(now_ms)
            );
            return;
        }

        let unix_time = self.clock.unix_time();
        if !is_plausible(unix_time, self.min_plausible_epoch) {
            warn!(
                "Clock at {} is before {}, skipping connect and requesting resync",
                unix_time, self.min_plausible_epoch
            );
            self.clock.request_resync();
            return;
        }

        if let Err(e) = self.state.begin_connect() {
            error!("Connect attempt from unexpected state: {}", e);
            return;
        }
        info!(
            "Connecting to {}:{} as '{}'",
            self.endpoint, self.port, self.client_id
        );

        let request = ConnectRequest {
            client_id: &self.client_id,
            endpoint: &self.endpoint,
            port: self.port,
            keep_alive: self.keep_alive,
            clean_session: false,
            credentials: &self.credentials,
        };
        let result = timeout(self.connect_timeout, self.transport.connect(&request)).await;

        match result {
            Ok(Ok(outcome)) => match self.state.connect_succeeded() {
                Ok(()) => info!(
                    "Connected to broker (session present: {})",
                    outcome.session_present
                ),
                Err(e) => {
                    error!("Connect completed from unexpected state: {}", e);
                    self.abandon_session().await;
                }
            },
            Ok(Err(e)) => {
                warn!(
                    "Connect failed: {}, retrying in {}ms",
                    e,
                    self.connect_backoff.period_ms()
                );
                self.abandon_session().await;
            }
            Err(_) => {
                warn!(
                    "Connect timed out after {:?}, retrying in {}ms",
                    self.connect_timeout,
                    self.connect_backoff.period_ms()
                );
                self.abandon_session().await;
            }
        }
    }

    async fn try_subscribe(&mut self) -> TickOutcome {
        let topic = self.topics.command.clone();
        match timeout(self.subscribe_timeout, self.transport.subscribe(&topic)).await {
            Ok(Ok(())) => match self.state.subscribed() {
                Ok(()) => {
                    info!("Subscribed to {}", topic);
                    TickOutcome::Subscribed
                }
                Err(e) => {
                    error!("Subscription completed from unexpected state: {}", e);
                    TickOutcome::Idle
                }
            },
            Ok(Err(e)) if e.is_session_lost() => {
                warn!("Session lost while subscribing: {}", e);
                self.abandon_session().await;
                TickOutcome::Idle
            }
            Ok(Err(e)) => {
                warn!("Subscribe to {} failed: {}, retrying", topic, e);
                TickOutcome::Idle
            }
            Err(_) => {
                warn!("Subscribe to {} timed out, retrying", topic);
                TickOutcome::Idle
            }
        }
    }

    async fn service(&mut self) -> TickOutcome {
        match self.transport.poll().await {
            Ok(Some(message)) if message.topic == self.topics.command => {
                debug!(
                    "Command frame received ({} bytes)",
                    message.payload.len()
                );
                TickOutcome::Command(message)
            }
            Ok(Some(message)) => {
                debug!("Ignoring frame on {}", message.topic);
                TickOutcome::Idle
            }
            Ok(None) => TickOutcome::Idle,
            Err(e) => {
                warn!("Broker session lost: {}", e);
                self.abandon_session().await;
                TickOutcome::Idle
            }
        }
    }

    async fn abandon_session(&mut self) {
        self.transport.disconnect().await;
        self.state.connect_failed();
    }

    async fn drop_link(&mut self) {
        if self.state.is_connected() {
            self.transport.disconnect().await;
        }
        self.state.link_lost();
    }
}
