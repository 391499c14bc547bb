//! # Device Configuration
//!
//! One immutable [`DeviceConfig`] value is read at startup and passed by
//! reference to every component. Nothing reads configuration from globals.
//!
//! The file is TOML. Every section has defaults matching the reference relay
//! board (two channels on GPIO 26/27, active high, TLS broker on 8883), so a
//! config file only needs the fields that differ. A missing file is created
//! with the defaults on first start.
//!
//! ```toml
//! thing_name = "esp32-relay-01"
//!
//! [broker]
//! endpoint = "example-ats.iot.ap-southeast-2.amazonaws.com"
//!
//! [credentials]
//! root_ca = { path = "/etc/relaylink/AmazonRootCA1.pem" }
//! certificate = { path = "/etc/relaylink/device.pem.crt" }
//! private_key = { path = "/etc/relaylink/private.pem.key" }
//!
//! [[relay.channels]]
//! id = 1
//! pin = 26
//! polarity = "active_high"
//! ```

use crate::relay::Polarity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "relaylink";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "RELAYLINK_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete device configuration
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Stable identity: MQTT client id and topic prefix
    pub thing_name: String,
    pub broker: BrokerConfig,
    pub credentials: CredentialConfig,
    pub network: NetworkConfig,
    pub clock: ClockConfig,
    pub status: StatusConfig,
    pub controller: LoopConfig,
    pub relay: RelayConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            thing_name: "esp32-relay-01".to_string(),
            broker: BrokerConfig::default(),
            credentials: CredentialConfig::default(),
            network: NetworkConfig::default(),
            clock: ClockConfig::default(),
            status: StatusConfig::default(),
            controller: LoopConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub endpoint: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Ceiling for the TLS handshake plus MQTT CONNECT/CONNACK
    pub connect_timeout_ms: u64,
    pub subscribe_timeout_ms: u64,
    /// Minimum delay between consecutive connect attempts
    pub retry_interval_ms: u64,
    /// How long one tick waits for an inbound frame
    pub poll_window_ms: u64,
    /// Capacity of the outgoing request queue
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 8883,
            keep_alive_secs: 30,
            connect_timeout_ms: 5_000,
            subscribe_timeout_ms: 3_000,
            retry_interval_ms: 5_000,
            poll_window_ms: 50,
            request_capacity: 16,
        }
    }
}

impl BrokerConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }
}

/// Where a PEM artifact comes from
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum PemSource {
    File { path: PathBuf },
    Inline { pem: String },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CredentialConfig {
    pub root_ca: PemSource,
    pub certificate: PemSource,
    pub private_key: PemSource,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        let dir = config_dir().join("certs");
        Self {
            root_ca: PemSource::File {
                path: dir.join("AmazonRootCA1.pem"),
            },
            certificate: PemSource::File {
                path: dir.join("device.pem.crt"),
            },
            private_key: PemSource::File {
                path: dir.join("private.pem.key"),
            },
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Link-up checks per bring-up attempt
    pub attempts: u32,
    pub attempt_interval_ms: u64,
    pub resolve_timeout_ms: u64,
    /// Directory listing network interfaces (Linux sysfs)
    pub sysfs_net: PathBuf,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            attempt_interval_ms: 300,
            resolve_timeout_ms: 2_000,
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    /// Unix time below which the wall clock is considered unset
    pub min_plausible_epoch: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            // 2023-11-14T22:13:20Z
            min_plausible_epoch: 1_700_000_000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    pub interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    pub tick_interval_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
        }
    }
}

impl LoopConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayBackend {
    #[default]
    Gpio,
    Simulated,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    pub id: u8,
    /// BCM pin number
    pub pin: u8,
    #[serde(default)]
    pub polarity: Polarity,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub backend: RelayBackend,
    pub channels: Vec<ChannelConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: RelayBackend::Gpio,
            channels: vec![
                ChannelConfig {
                    id: 1,
                    pin: 26,
                    polarity: Polarity::ActiveHigh,
                },
                ChannelConfig {
                    id: 2,
                    pin: 27,
                    polarity: Polarity::ActiveHigh,
                },
            ],
        }
    }
}

impl RelayConfig {
    /// Default channel layout on in-memory outputs.
    pub fn simulated() -> Self {
        Self {
            backend: RelayBackend::Simulated,
            ..Self::default()
        }
    }
}

impl DeviceConfig {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the device cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thing_name.trim().is_empty() {
            return Err(ConfigError::Invalid("thing_name must not be empty".into()));
        }
        if self.thing_name.contains(['+', '#', '/']) {
            return Err(ConfigError::Invalid(format!(
                "thing_name '{}' must not contain MQTT topic separators or wildcards",
                self.thing_name
            )));
        }
        if self.broker.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.endpoint must not be empty".into()));
        }
        for (field, value) in [
            ("broker.retry_interval_ms", self.broker.retry_interval_ms),
            ("broker.connect_timeout_ms", self.broker.connect_timeout_ms),
            ("broker.subscribe_timeout_ms", self.broker.subscribe_timeout_ms),
            ("broker.poll_window_ms", self.broker.poll_window_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", field)));
            }
        }
        if self.controller.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "controller.tick_interval_ms must be positive".into(),
            ));
        }
        if self.status.interval_ms == 0 {
            return Err(ConfigError::Invalid("status.interval_ms must be positive".into()));
        }
        if self.relay.channels.is_empty() {
            return Err(ConfigError::Invalid("at least one relay channel is required".into()));
        }

        let count = self.relay.channels.len();
        let mut seen_ids = HashSet::new();
        let mut seen_pins = HashSet::new();
        for ch in &self.relay.channels {
            if ch.id == 0 || usize::from(ch.id) > count {
                return Err(ConfigError::Invalid(format!(
                    "relay channel id {} outside 1..={}",
                    ch.id, count
                )));
            }
            if !seen_ids.insert(ch.id) {
                return Err(ConfigError::Invalid(format!(
                    "relay channel id {} configured twice",
                    ch.id
                )));
            }
            if !seen_pins.insert(ch.pin) {
                return Err(ConfigError::Invalid(format!(
                    "GPIO {} assigned to more than one channel",
                    ch.pin
                )));
            }
        }
        Ok(())
    }
}

/// `<config dir>/relaylink`, falling back to the working directory.
pub fn config_dir() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join(CONFIG_DIR),
        None => PathBuf::from(".").join(CONFIG_DIR),
    }
}

/// `$RELAYLINK_CONFIG` if set, else `<config dir>/relaylink/config.toml`.
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => PathBuf::from(path),
        None => config_dir().join(CONFIG_FILE),
    }
}

/// Writes the default configuration to `path` if nothing is there yet.
pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if exists {
        return Ok(());
    }

    warn!("No configuration at {}, writing defaults", path.display());
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let content = toml::to_string_pretty(&DeviceConfig::default())?;
    tokio::fs::write(path, content)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

/// Loads and validates the configuration at `path`, creating it if missing.
pub async fn load(path: &Path) -> Result<DeviceConfig, ConfigError> {
    ensure_default_config(path).await?;

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let config = DeviceConfig::from_toml(&content, path)?;

    info!(
        "Loaded configuration for '{}' from {}",
        config.thing_name,
        path.display()
    );
    debug!("Configuration: {:?}", config);
    Ok(config)
}
