//! # Relay Bank
//!
//! Owns the logical ON/OFF state of the configured relay channels and the
//! mapping from logical state to the physical signal level on each output.
//!
//! ## Why This Module Exists
//!
//! Relay boards come in two flavours: inputs that energise the coil on a
//! high signal and inputs that energise it on a low signal. The rest of the
//! crate only ever speaks in [`RelayState`]; the bank translates through each
//! channel's [`Polarity`] and never stores logical state separately from the
//! line. Reading a channel reads the line level back, so the reported state
//! is always what the hardware is actually being driven to.
//!
//! ## Layout
//!
//! ```text
//! relay/
//! ├── mod.rs        - RelayBank, polarity mapping, OutputLine trait
//! ├── gpio.rs       - rppal-backed output lines
//! └── simulated.rs  - in-memory lines for hosts without GPIO
//! ```
//!
//! Channels are addressed 1..=N. Ids outside that range are a programming
//! error upstream; the bank reports them as [`RelayError::InvalidChannel`]
//! and leaves every output untouched.

pub mod gpio;
pub mod simulated;

use crate::config::{RelayBackend, RelayConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

pub use gpio::GpioLine;
pub use simulated::SimulatedLine;

/// Logical relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn complement(self) -> Self {
        match self {
            RelayState::On => RelayState::Off,
            RelayState::Off => RelayState::On,
        }
    }

    /// Wire representation used in status messages (1 = ON).
    pub fn as_bit(self) -> u8 {
        match self {
            RelayState::On => 1,
            RelayState::Off => 0,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelayState::On => write!(f, "ON"),
            RelayState::Off => write!(f, "OFF"),
        }
    }
}

/// Physical signal level on an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

/// Which signal level energises the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub fn level_for(self, state: RelayState) -> Level {
        match (self, state) {
            (Polarity::ActiveHigh, RelayState::On) | (Polarity::ActiveLow, RelayState::Off) => {
                Level::High
            }
            (Polarity::ActiveHigh, RelayState::Off) | (Polarity::ActiveLow, RelayState::On) => {
                Level::Low
            }
        }
    }

    pub fn state_for(self, level: Level) -> RelayState {
        match (self, level) {
            (Polarity::ActiveHigh, Level::High) | (Polarity::ActiveLow, Level::Low) => {
                RelayState::On
            }
            (Polarity::ActiveHigh, Level::Low) | (Polarity::ActiveLow, Level::High) => {
                RelayState::Off
            }
        }
    }
}

/// A single digital output driving one relay input.
pub trait OutputLine: Send {
    fn drive(&mut self, level: Level);

    /// Level the line is currently being driven to.
    fn level(&self) -> Level;
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay channel {id} (configured channels: 1..={count})")]
    InvalidChannel { id: u8, count: usize },

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("invalid relay configuration: {0}")]
    Config(String),
}

/// One addressable relay channel
pub struct Channel {
    id: u8,
    polarity: Polarity,
    line: Box<dyn OutputLine>,
}

impl Channel {
    pub fn new(id: u8, polarity: Polarity, line: Box<dyn OutputLine>) -> Self {
        Self { id, polarity, line }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    fn state(&self) -> RelayState {
        self.polarity.state_for(self.line.level())
    }
}

/// The bank of relay channels, indexed 1..=N
pub struct RelayBank {
    channels: Vec<Channel>,
}

impl RelayBank {
    /// Builds the bank and drives every channel to OFF.
    ///
    /// Channels must carry the ids 1..=N in any order.
    pub fn new(mut channels: Vec<Channel>) -> Result<Self, RelayError> {
        channels.sort_by_key(|c| c.id);
        for (index, channel) in channels.iter().enumerate() {
            if usize::from(channel.id) != index + 1 {
                return Err(RelayError::Config(format!(
                    "channel ids must be contiguous from 1, found {} at position {}",
                    channel.id,
                    index + 1
                )));
            }
        }

        let mut bank = Self { channels };
        for channel in &mut bank.channels {
            let off = channel.polarity.level_for(RelayState::Off);
            channel.line.drive(off);
        }
        info!("Relay bank ready with {} channels (all OFF)", bank.len());
        Ok(bank)
    }

    /// Builds the bank for the configured backend.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let channels = match config.backend {
            RelayBackend::Gpio => {
                let gpio = rppal::gpio::Gpio::new()?;
                let mut channels = Vec::with_capacity(config.channels.len());
                for ch in &config.channels {
                    let off = ch.polarity.level_for(RelayState::Off);
                    let line = GpioLine::open(&gpio, ch.pin, off)?;
                    debug!(
                        "Channel {} bound to GPIO {} ({:?})",
                        ch.id, ch.pin, ch.polarity
                    );
                    channels.push(Channel::new(ch.id, ch.polarity, Box::new(line)));
                }
                channels
            }
            RelayBackend::Simulated => {
                info!("Using simulated relay outputs");
                config
                    .channels
                    .iter()
                    .map(|ch| {
                        let off = ch.polarity.level_for(RelayState::Off);
                        Channel::new(ch.id, ch.polarity, Box::new(SimulatedLine::new(off)))
                    })
                    .collect()
            }
        };
        Self::new(channels)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// The single mutation entry point. Idempotent.
    pub fn set_channel(&mut self, id: u8, state: RelayState) -> Result<(), RelayError> {
        let count = self.channels.len();
        let channel = self.channel_mut(id).ok_or(RelayError::InvalidChannel { id, count })?;
        let level = channel.polarity.level_for(state);
        channel.line.drive(level);
        debug!("Channel {} driven {:?} ({})", id, level, state);
        Ok(())
    }

    /// Reads the line level back and converts it through the polarity.
    pub fn read_channel(&self, id: u8) -> Result<RelayState, RelayError> {
        self.channel(id)
            .map(Channel::state)
            .ok_or(RelayError::InvalidChannel {
                id,
                count: self.channels.len(),
            })
    }

    /// All channel states in id order.
    pub fn snapshot(&self) -> Vec<(u8, RelayState)> {
        self.channels.iter().map(|c| (c.id, c.state())).collect()
    }

    fn channel(&self, id: u8) -> Option<&Channel> {
        usize::from(id)
            .checked_sub(1)
            .and_then(|index| self.channels.get(index))
    }

    fn channel_mut(&mut self, id: u8) -> Option<&mut Channel> {
        usize::from(id)
            .checked_sub(1)
            .and_then(|index| self.channels.get_mut(index))
    }
}
