//! Control plane towards the network simulator.
//!
//! This module holds the wire messages, the server configuration and the
//! request/reply loop that feeds inbound frames to the session controller.

pub mod config;
pub mod messages;
pub mod server;

pub use config::ServerConfig;
