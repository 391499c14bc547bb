//! Network availability
//!
//! Acquiring connectivity is the platform's job. The device only needs to
//! know whether a link is up and to wait, for a bounded time, for it to come
//! up and for the broker name to resolve.

use crate::config::DeviceConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no network link after {attempts} attempts")]
    LinkDown { attempts: u32 },

    #[error("could not resolve {host}: {reason}")]
    Unresolved { host: String, reason: String },
}

#[async_trait]
pub trait NetworkLink: Send {
    /// Cheap, non-blocking check of the current link state.
    fn is_up(&self) -> bool;

    /// Waits a bounded time for usable connectivity.
    async fn bring_up(&mut self) -> Result<(), NetworkError>;
}

/// Host network stack as seen through Linux sysfs and DNS
pub struct HostNetwork {
    sysfs_net: PathBuf,
    broker_host: String,
    broker_port: u16,
    attempts: u32,
    attempt_interval: Duration,
    resolve_timeout: Duration,
}

impl HostNetwork {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            sysfs_net: config.network.sysfs_net.clone(),
            broker_host: config.broker.endpoint.clone(),
            broker_port: config.broker.port,
            attempts: config.network.attempts.max(1),
            attempt_interval: Duration::from_millis(config.network.attempt_interval_ms),
            resolve_timeout: Duration::from_millis(config.network.resolve_timeout_ms),
        }
    }

    async fn resolve_broker(&self) -> Result<(), NetworkError> {
        let unresolved = |reason: String| NetworkError::Unresolved {
            host: self.broker_host.clone(),
            reason,
        };
        let lookup = lookup_host((self.broker_host.as_str(), self.broker_port));
        match timeout(self.resolve_timeout, lookup).await {
            Ok(Ok(mut addrs)) => match addrs.next() {
                Some(addr) => {
                    debug!("{} resolved to {}", self.broker_host, addr);
                    Ok(())
                }
                None => Err(unresolved("no addresses".to_string())),
            },
            Ok(Err(e)) => Err(unresolved(e.to_string())),
            Err(_) => Err(unresolved("lookup timed out".to_string())),
        }
    }
}

#[async_trait]
impl NetworkLink for HostNetwork {
    fn is_up(&self) -> bool {
        let entries = match std::fs::read_dir(&self.sysfs_net) {
            Ok(entries) => entries,
            // no sysfs: nothing to go on, let the connect attempt decide
            Err(_) => return true,
        };

        entries.flatten().any(|entry| {
            if entry.file_name() == "lo" {
                return false;
            }
            match std::fs::read_to_string(entry.path().join("operstate")) {
                Ok(state) => matches!(state.trim(), "up" | "unknown"),
                Err(_) => false,
            }
        })
    }

    async fn bring_up(&mut self) -> Result<(), NetworkError> {
        info!("Waiting for network connectivity");
        for attempt in 1..=self.attempts {
            if self.is_up() {
                self.resolve_broker().await?;
                info!("Network up after {} attempt(s)", attempt);
                return Ok(());
            }
            debug!("Link down (attempt {}/{})", attempt, self.attempts);
            sleep(self.attempt_interval).await;
        }
        warn!("Network still down after {} attempts", self.attempts);
        Err(NetworkError::LinkDown {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_with_sysfs(dir: PathBuf) -> HostNetwork {
        let mut config = DeviceConfig::default();
        config.network.sysfs_net = dir;
        config.network.attempts = 2;
        config.network.attempt_interval_ms = 1;
        HostNetwork::new(&config)
    }

    async fn fake_interface(root: &std::path::Path, name: &str, operstate: &str) {
        let dir = root.join(name);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("operstate"), format!("{}\n", operstate))
            .await
            .unwrap();
    }

    fn scratch(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("relaylink-net-{}-{}", tag, std::process::id()))
    }

    #[tokio::test]
    async fn loopback_alone_is_not_a_link() {
        let root = scratch("lo");
        fake_interface(&root, "lo", "unknown").await;
        fake_interface(&root, "eth0", "down").await;

        let mut network = network_with_sysfs(root.clone());
        assert!(!network.is_up());
        assert!(matches!(
            network.bring_up().await,
            Err(NetworkError::LinkDown { attempts: 2 })
        ));

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn interface_in_up_state_counts() {
        let root = scratch("up");
        fake_interface(&root, "lo", "unknown").await;
        fake_interface(&root, "wlan0", "up").await;

        assert!(network_with_sysfs(root.clone()).is_up());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[test]
    fn missing_sysfs_assumes_up() {
        assert!(network_with_sysfs(PathBuf::from("/nonexistent/relaylink/net")).is_up());
    }
}
