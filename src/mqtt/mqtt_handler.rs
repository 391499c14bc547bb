use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubscribeReasonCode, TlsConfiguration,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::session::transport::{
    ConnectOutcome, ConnectRequest, InboundMessage, Transport, TransportError,
};

const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

/// rumqttc client over mutually authenticated TLS.
///
/// A fresh client and event loop are built for every connect. After any
/// error both are dropped, so the event loop never reconnects on its own;
/// reconnecting is the session manager's decision.
pub struct MqttTransport {
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    /// Publishes that arrived while waiting for an acknowledgement
    pending: VecDeque<InboundMessage>,
    poll_window: Duration,
    request_capacity: usize,
}

impl MqttTransport {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            client: None,
            eventloop: None,
            pending: VecDeque::new(),
            poll_window: config.poll_window(),
            request_capacity: config.request_capacity.max(1),
        }
    }

    fn options(request: &ConnectRequest<'_>) -> MqttOptions {
        let credentials = request.credentials;
        let tls = TlsConfiguration::Simple {
            ca: credentials.root_trust().to_vec(),
            alpn: None,
            client_auth: Some((
                credentials.client_certificate().to_vec(),
                credentials.client_private_key().to_vec(),
            )),
        };

        let mut options = MqttOptions::new(request.client_id, request.endpoint, request.port);
        options
            .set_keep_alive(request.keep_alive)
            .set_clean_session(request.clean_session)
            .set_transport(rumqttc::Transport::tls_with_config(tls));
        options
    }

    async fn next_event(&mut self) -> Result<Event, TransportError> {
        let eventloop = self
            .eventloop
            .as_mut()
            .ok_or(TransportError::NotConnected)?;
        match eventloop.poll().await {
            Ok(event) => Ok(event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                Err(TransportError::Refused(format!("{:?}", code)))
            }
            Err(e) => Err(TransportError::Connection(e)),
        }
    }

    fn stash(&mut self, publish: Publish) {
        self.pending.push_back(InboundMessage {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        });
    }

    /// Interprets one event while waiting for a SUBACK.
    ///
    /// `None` means keep waiting. Publishes arriving meanwhile are queued
    /// for the next `poll`.
    fn on_subscribe_event(
        &mut self,
        topic: &str,
        event: Event,
    ) -> Option<Result<(), TransportError>> {
        match event {
            Event::Incoming(Packet::SubAck(ack)) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    Some(Err(TransportError::SubscribeRejected(topic.to_string())))
                } else {
                    Some(Ok(()))
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.stash(publish);
                None
            }
            Event::Incoming(Packet::Disconnect) => Some(Err(broker_disconnected())),
            _ => None,
        }
    }

    /// Interprets one event inside the poll window. `None` means keep polling.
    fn on_poll_event(
        &mut self,
        event: Event,
    ) -> Option<Result<Option<InboundMessage>, TransportError>> {
        match event {
            Event::Incoming(Packet::Publish(publish)) => Some(Ok(Some(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }))),
            Event::Incoming(Packet::Disconnect) => Some(Err(broker_disconnected())),
            _ => None,
        }
    }

    fn teardown(&mut self) {
        self.client = None;
        self.eventloop = None;
        self.pending.clear();
    }
}

fn broker_disconnected() -> TransportError {
    TransportError::SessionLost("broker sent DISCONNECT".to_string())
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &mut self,
        request: &ConnectRequest<'_>,
    ) -> Result<ConnectOutcome, TransportError> {
        self.teardown();
        let (client, eventloop) =
            AsyncClient::new(Self::options(request), self.request_capacity);
        self.client = Some(client);
        self.eventloop = Some(eventloop);

        loop {
            match self.next_event().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("CONNACK {:?}", ack.code);
                    return Ok(ConnectOutcome {
                        session_present: ack.session_present,
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => self.stash(publish),
                Ok(_) => {}
                Err(e) => {
                    self.teardown();
                    return Err(e);
                }
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client.subscribe(topic, QoS::AtLeastOnce).await?;

        loop {
            let event = self.next_event().await?;
            if let Some(outcome) = self.on_subscribe_event(topic, event) {
                return outcome;
            }
        }
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        if self.eventloop.is_none() {
            return Err(TransportError::NotConnected);
        }

        let window = self.poll_window;
        loop {
            let event = match timeout(window, self.next_event()).await {
                Ok(event) => event?,
                Err(_) => return Ok(None),
            };
            if let Some(outcome) = self.on_poll_event(event) {
                return outcome;
            }
        }
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        client.try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(client) = self.client.take() else {
            self.teardown();
            return;
        };
        if let Err(e) = client.try_disconnect() {
            debug!("DISCONNECT not queued: {}", e);
            self.teardown();
            return;
        }

        // let the event loop write the DISCONNECT before dropping it
        let flushed = timeout(DISCONNECT_FLUSH, async {
            while let Ok(event) = self.next_event().await {
                if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                    return true;
                }
            }
            false
        })
        .await;
        match flushed {
            Ok(true) => info!("Broker session closed"),
            _ => warn!("Broker session dropped without a clean DISCONNECT"),
        }
        self.teardown();
    }
}
