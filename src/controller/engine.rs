use statum::{machine, state};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command;
use crate::config::DeviceConfig;
use crate::relay::RelayBank;
use crate::session::{SessionManager, SessionState, TickOutcome};
use crate::status::{PublishError, StatusPublisher};
use crate::timer::Uptime;

/// Lifecycle of an online controller
#[state]
#[derive(Debug, Clone)]
pub enum ControllerState {
    Starting, // Collaborators wired, loop not entered yet
    Running,  // Ticking: session, commands, status
    Stopping, // Loop left, session still open
    Stopped,  // Session closed
}

/// The cooperative control loop with compile-time lifecycle states
///
/// One value owns the relays, the session and the status schedule. Nothing
/// is shared, so there are no locks: a command is fully applied before the
/// status publish it triggers reads the bank.
#[machine]
pub struct Controller<S: ControllerState> {
    config: DeviceConfig,
    relays: RelayBank,
    session: SessionManager,
    publisher: StatusPublisher,
    uptime: Uptime,
}

impl<S: ControllerState> Controller<S> {
    pub fn relays(&self) -> &RelayBank {
        &self.relays
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }
}

impl Controller<Starting> {
    pub fn create(
        config: DeviceConfig,
        relays: RelayBank,
        session: SessionManager,
        uptime: Uptime,
    ) -> Self {
        let publisher = StatusPublisher::new(
            &config.thing_name,
            config.status.interval_ms,
            uptime.now_ms(),
        );
        info!("Controller created for '{}'", config.thing_name);

        Self::new(config, relays, session, publisher, uptime)
    }

    pub fn start(self) -> Controller<Running> {
        info!(
            "Starting control loop ({}ms tick, status every {}ms)",
            self.config.controller.tick_interval_ms, self.config.status.interval_ms
        );
        self.transition()
    }
}

impl Controller<Running> {
    /// One loop iteration at uptime `now` (ms).
    ///
    /// Order: session step, then the command it delivered (if any) with its
    /// immediate status publish, then the periodic publish when due.
    pub async fn tick(&mut self, now: u64) {
        match self.session.tick(now).await {
            TickOutcome::Idle => {}
            TickOutcome::Subscribed => {
                debug!("Fresh subscription, publishing initial status");
                self.report(now);
            }
            TickOutcome::Command(message) => self.handle_command(&message.payload, now),
        }

        if let Some(Err(e)) = self
            .publisher
            .publish_if_due(&mut self.session, &self.relays, now)
        {
            log_publish_error(&e);
        }
    }

    fn handle_command(&mut self, payload: &[u8], now: u64) {
        match command::process(payload, &mut self.relays) {
            Ok((intent, state)) => {
                info!(
                    "Command {} on channel {}: now {}",
                    intent.action, intent.channel, state
                );
                self.report(now);
            }
            Err(e) => warn!("Ignoring command: {}", e),
        }
    }

    fn report(&mut self, now: u64) {
        if let Err(e) = self.publisher.publish(&mut self.session, &self.relays, now) {
            log_publish_error(&e);
        }
    }

    /// Ticks every `controller.tick_interval` until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between ticks, so a command that has
    /// been received is always applied and reported.
    pub async fn run_until_shutdown(mut self, shutdown: CancellationToken) -> Controller<Stopping> {
        let mut ticker = interval(self.config.controller.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, leaving control loop");
                    break;
                }
                _ = ticker.tick() => {}
            }
            let now = self.uptime.now_ms();
            self.tick(now).await;
        }

        self.transition()
    }
}

impl Controller<Stopping> {
    /// Closes the broker session. Relays keep their last state.
    pub async fn shutdown(mut self) -> Controller<Stopped> {
        self.session.shutdown().await;
        info!("Controller stopped");
        self.transition()
    }
}

impl Controller<Stopped> {}

fn log_publish_error(e: &PublishError) {
    match e {
        PublishError::NotConnected => debug!("Status not published: {}", e),
        _ => warn!("Status not published: {}", e),
    }
}
