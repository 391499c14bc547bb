use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::credentials::CredentialError;
use crate::relay::RelayBank;

const FAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Device without a usable credential bundle.
///
/// The relays stay configured and held OFF (or wherever local code puts
/// them), but no broker session is ever attempted.
pub struct LocalOnly {
    relays: RelayBank,
    fault: CredentialError,
}

impl LocalOnly {
    pub fn new(relays: RelayBank, fault: CredentialError) -> Self {
        Self { relays, fault }
    }

    pub fn fault(&self) -> &CredentialError {
        &self.fault
    }

    pub fn relays(&self) -> &RelayBank {
        &self.relays
    }

    pub fn relays_mut(&mut self) -> &mut RelayBank {
        &mut self.relays
    }

    /// Waits for shutdown, repeating the fault in the log so a device that
    /// is left running stays diagnosable.
    pub async fn park_until_shutdown(self, shutdown: CancellationToken) -> RelayBank {
        let mut reminder = interval(FAULT_REPORT_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = reminder.tick() => {
                    error!("Running without broker connection: {}", self.fault);
                }
            }
        }
        info!("Local-only controller stopped");
        self.relays
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::credentials::Artifact;
    use crate::relay::RelayState;

    fn local_only() -> LocalOnly {
        LocalOnly::new(
            RelayBank::from_config(&RelayConfig::simulated()).unwrap(),
            CredentialError::Incomplete {
                missing: vec![Artifact::ClientPrivateKey],
            },
        )
    }

    #[test]
    fn relays_stay_locally_controllable() {
        let mut parked = local_only();
        parked.relays_mut().set_channel(1, RelayState::On).unwrap();
        assert_eq!(parked.relays().read_channel(1).unwrap(), RelayState::On);
    }

    #[tokio::test]
    async fn returns_relays_on_shutdown() {
        let mut parked = local_only();
        parked.relays_mut().set_channel(2, RelayState::On).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let relays = parked.park_until_shutdown(shutdown).await;
        assert_eq!(relays.read_channel(2).unwrap(), RelayState::On);
    }
}
