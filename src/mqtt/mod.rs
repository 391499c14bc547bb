//! # MQTT Integration Module
//!
//! The broker-facing half of the session: topic naming for a device and the
//! rumqttc-backed [`Transport`](crate::session::Transport) implementation.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── topics.rs        - per-device topic names
//! └── mqtt_handler.rs  - MqttTransport, TLS options and the event loop
//! ```
//!
//! ## Topics
//!
//! Every topic is rooted at the thing name:
//!
//! | Topic                | Direction | QoS | Retained |
//! |----------------------|-----------|-----|----------|
//! | `<thing>/command`    | in        | 1   | -        |
//! | `<thing>/state`      | out       | 1   | yes      |
//! | `<thing>/heartbeat`  | out       | 1   | yes      |
//!
//! The session is persistent (clean session off) so the broker keeps the
//! command subscription while the device is away, but the subscription is
//! still renewed after every reconnect.

pub mod mqtt_handler;
pub mod topics;

pub use mqtt_handler::MqttTransport;
pub use topics::Topics;
