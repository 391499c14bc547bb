//! Command ingestion
//!
//! Inbound frames on `<thing>/command` are small JSON objects:
//!
//! ```json
//! {"action": "on" | "off" | "toggle", "channel": 2, "value": 0}
//! ```
//!
//! `action` is required and case-sensitive. `channel` defaults to 1.
//! `value` is accepted and carried on the intent but nothing acts on it yet.
//!
//! Decoding and applying are separate steps so a bad payload can never
//! reach the relays: [`decode`] either yields a complete [`CommandIntent`]
//! or a [`ParseError`], and only an intent is handed to [`apply`].

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::relay::{RelayBank, RelayError, RelayState};

/// Frames above this size are rejected before parsing
pub const MAX_COMMAND_BYTES: usize = 512;

const DEFAULT_CHANNEL: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    On,
    Off,
    Toggle,
}

impl Action {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "on" => Some(Action::On),
            "off" => Some(Action::Off),
            "toggle" => Some(Action::Toggle),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::On => "on",
            Action::Off => "off",
            Action::Toggle => "toggle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandIntent {
    pub channel: u8,
    pub action: Action,
    pub value: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing \"action\"")]
    MissingAction,

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("\"{field}\" must be an integer")]
    NotAnInteger { field: &'static str },

    #[error("channel {0} is out of range")]
    ChannelOutOfRange(i64),
}

/// Either half of processing one frame failed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("rejected command: {0}")]
    Parse(#[from] ParseError),

    #[error("command not applied: {0}")]
    Relay(#[from] RelayError),
}

pub fn decode(raw: &[u8]) -> Result<CommandIntent, ParseError> {
    if raw.len() > MAX_COMMAND_BYTES {
        return Err(ParseError::TooLarge {
            size: raw.len(),
            limit: MAX_COMMAND_BYTES,
        });
    }

    let value: Value = serde_json::from_slice(raw)?;
    let object = value.as_object().ok_or(ParseError::NotAnObject)?;

    let action = match object.get("action") {
        None | Some(Value::Null) => return Err(ParseError::MissingAction),
        Some(Value::String(name)) => {
            Action::parse(name).ok_or_else(|| ParseError::UnknownAction(format!("{:?}", name)))?
        }
        Some(other) => return Err(ParseError::UnknownAction(other.to_string())),
    };

    let channel = match integer_field(object, "channel")? {
        None => DEFAULT_CHANNEL,
        Some(n) => u8::try_from(n).map_err(|_| ParseError::ChannelOutOfRange(n))?,
    };

    Ok(CommandIntent {
        channel,
        action,
        value: integer_field(object, "value")?,
    })
}

fn integer_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, ParseError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or(ParseError::NotAnInteger { field }),
    }
}

/// Applies an intent, returning the channel's new state.
///
/// Toggle reads the current state back from the bank and sets its
/// complement. An out-of-range channel leaves every relay untouched.
pub fn apply(intent: &CommandIntent, bank: &mut RelayBank) -> Result<RelayState, RelayError> {
    let target = match intent.action {
        Action::On => RelayState::On,
        Action::Off => RelayState::Off,
        Action::Toggle => bank.read_channel(intent.channel)?.complement(),
    };
    bank.set_channel(intent.channel, target)?;
    Ok(target)
}

/// Decodes and applies one frame.
pub fn process(
    raw: &[u8],
    bank: &mut RelayBank,
) -> Result<(CommandIntent, RelayState), CommandError> {
    let intent = decode(raw)?;
    let state = apply(&intent, bank)?;
    Ok((intent, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn bank() -> RelayBank {
        RelayBank::from_config(&RelayConfig::simulated()).unwrap()
    }

    #[test]
    fn decodes_full_command() {
        let intent = decode(br#"{"action":"toggle","channel":2,"value":7}"#).unwrap();
        assert_eq!(
            intent,
            CommandIntent {
                channel: 2,
                action: Action::Toggle,
                value: Some(7),
            }
        );
    }

    #[test]
    fn channel_defaults_to_one() {
        let intent = decode(br#"{"action":"off"}"#).unwrap();
        assert_eq!(intent.channel, 1);
        assert_eq!(intent.value, None);
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(matches!(decode(b"not json"), Err(ParseError::Malformed(_))));
        assert!(matches!(decode(b"[1,2]"), Err(ParseError::NotAnObject)));
        assert!(matches!(decode(b"{}"), Err(ParseError::MissingAction)));
        assert!(matches!(
            decode(br#"{"channel":1}"#),
            Err(ParseError::MissingAction)
        ));
        assert!(matches!(
            decode(br#"{"action":"ON"}"#),
            Err(ParseError::UnknownAction(_))
        ));
        assert!(matches!(
            decode(br#"{"action":"flip"}"#),
            Err(ParseError::UnknownAction(_))
        ));
        assert!(matches!(
            decode(br#"{"action":1}"#),
            Err(ParseError::UnknownAction(_))
        ));
        assert!(matches!(
            decode(br#"{"action":"on","channel":"2"}"#),
            Err(ParseError::NotAnInteger { field: "channel" })
        ));
        assert!(matches!(
            decode(br#"{"action":"on","channel":1.5}"#),
            Err(ParseError::NotAnInteger { field: "channel" })
        ));
        assert!(matches!(
            decode(br#"{"action":"on","value":"x"}"#),
            Err(ParseError::NotAnInteger { field: "value" })
        ));
        assert!(matches!(
            decode(br#"{"action":"on","channel":-1}"#),
            Err(ParseError::ChannelOutOfRange(-1))
        ));
        assert!(matches!(
            decode(br#"{"action":"on","channel":256}"#),
            Err(ParseError::ChannelOutOfRange(256))
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let padding = " ".repeat(MAX_COMMAND_BYTES);
        let raw = format!(r#"{{"action":"on"}}{}"#, padding);
        assert!(matches!(
            decode(raw.as_bytes()),
            Err(ParseError::TooLarge { .. })
        ));
    }

    #[test]
    fn switches_channel_two_on() {
        let mut bank = bank();
        assert_eq!(bank.read_channel(2).unwrap(), RelayState::Off);

        let (_, state) = process(br#"{"action":"on","channel":2}"#, &mut bank).unwrap();
        assert_eq!(state, RelayState::On);
        assert_eq!(bank.read_channel(2).unwrap(), RelayState::On);
        assert_eq!(bank.read_channel(1).unwrap(), RelayState::Off);
    }

    #[test]
    fn toggle_defaults_to_channel_one() {
        let mut bank = bank();
        bank.set_channel(1, RelayState::On).unwrap();

        let (intent, state) = process(br#"{"action":"toggle"}"#, &mut bank).unwrap();
        assert_eq!(intent.channel, 1);
        assert_eq!(state, RelayState::Off);
        assert_eq!(bank.read_channel(1).unwrap(), RelayState::Off);
    }

    #[test]
    fn toggle_twice_restores_state() {
        let mut bank = bank();
        let intent = decode(br#"{"action":"toggle","channel":2}"#).unwrap();
        let before = bank.read_channel(2).unwrap();
        apply(&intent, &mut bank).unwrap();
        apply(&intent, &mut bank).unwrap();
        assert_eq!(bank.read_channel(2).unwrap(), before);
    }

    #[test]
    fn bad_payload_mutates_nothing() {
        let mut bank = bank();
        bank.set_channel(2, RelayState::On).unwrap();
        let before = bank.snapshot();

        for raw in [
            &br#"{"channel":2}"#[..],
            br#"{"action":"explode","channel":2}"#,
            b"garbage",
            br#"{"action":"off","channel":3}"#,
            br#"{"action":"toggle","channel":0}"#,
        ] {
            assert!(process(raw, &mut bank).is_err());
        }
        assert_eq!(bank.snapshot(), before);
    }

    #[test]
    fn out_of_range_channel_is_invalid_channel() {
        let mut bank = bank();
        let err = process(br#"{"action":"on","channel":9}"#, &mut bank).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Relay(RelayError::InvalidChannel { id: 9, .. })
        ));
    }
}
