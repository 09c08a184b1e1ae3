//! MQTT [`Transport`] over the synchronous rumqttc client.

use super::{Transport, TransportEvent};
use crate::config::MqttSettings;
use crate::error::{Result, WatchError};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError};
use std::time::Duration;
use tracing::debug;

/// Request queue depth between the client handle and its event loop.
const REQUEST_CAPACITY: usize = 64;

/// rumqttc rejects keepalives under five seconds.
const MIN_KEEPALIVE_SECS: u64 = 5;

/// Broker connection. Each [`connect`](Transport::connect) builds a fresh
/// client so reconnect pacing stays with the caller's backoff.
pub struct MqttTransport {
    settings: MqttSettings,
    session: Option<(Client, Connection)>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.hostname.clone(),
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(
            self.settings.keepalive.max(MIN_KEEPALIVE_SECS),
        ));
        if let Some(username) = &self.settings.username {
            options.set_credentials(username.clone(), self.settings.password.clone());
        }
        options
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.session = Some(Client::new(self.options(), REQUEST_CAPACITY));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        let (client, _) = self
            .session
            .as_mut()
            .ok_or_else(|| WatchError::Transport("subscribe without connection".to_string()))?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| WatchError::Transport(e.to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Result<TransportEvent> {
        let (_, connection) = self
            .session
            .as_mut()
            .ok_or_else(|| WatchError::Transport("poll without connection".to_string()))?;
        match connection.recv_timeout(timeout) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => Ok(TransportEvent::Connected),
            Ok(Ok(Event::Incoming(Packet::SubAck(_)))) => Ok(TransportEvent::Subscribed),
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Ok(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Ok(_)) => Ok(TransportEvent::Idle),
            Ok(Err(e)) => Err(WatchError::Transport(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Ok(TransportEvent::Idle),
            Err(RecvTimeoutError::Disconnected) => {
                Err(WatchError::Transport("event loop closed".to_string()))
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some((client, _)) = self.session.take() {
            if let Err(e) = client.disconnect() {
                debug!(error = %e, "mqtt disconnect request failed");
            }
        }
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.settings.hostname, self.settings.port)
    }
}
