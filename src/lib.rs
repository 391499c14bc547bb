//! Network-attached relay controller
//!
//! Drives a small bank of relays from commands received over MQTT with
//! mutual TLS, and reports relay state back to the broker on a schedule and
//! after every change.

pub mod command;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod mqtt;
pub mod relay;
pub mod session;
pub mod status;
pub mod timer;
