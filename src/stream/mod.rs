//! Reconnecting pub/sub stream client.

mod backoff;
mod client;
mod mqtt;

pub use backoff::Backoff;
pub use client::{StreamClient, StreamConfig, StreamState, Transport, TransportEvent};
pub use mqtt::MqttTransport;
