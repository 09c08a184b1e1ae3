//! Reconnect state machine over a [`Transport`].

use super::Backoff;
use crate::bridge::BridgeSender;
use crate::cancel::CancelToken;
use crate::codec::{decode_inbound, Codec, Inbound};
use crate::config::MqttSettings;
use crate::error::{Result, WatchError};
use crate::types::{comm_exception_fields, DiagnosticKind, Record};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Inbound payloads are cut to this many characters in parse diagnostics.
const MAX_DIAGNOSTIC_PAYLOAD: usize = 1024;

/// What a transport poll produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection.
    Connected,
    /// The broker acknowledged the subscription.
    Subscribed,
    Message { topic: String, payload: Vec<u8> },
    /// Nothing arrived within the poll timeout.
    Idle,
}

/// Pub/sub connection seam.
///
/// Recoverable failures are reported as [`WatchError::Transport`]; anything
/// else returned from these methods stops the client.
pub trait Transport: Send {
    /// Start a fresh connection, dropping any previous one.
    fn connect(&mut self) -> Result<()>;

    /// Request a subscription. Acknowledged later through [`poll`](Self::poll).
    fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Wait up to `timeout` for the next connection event.
    fn poll(&mut self, timeout: Duration) -> Result<TransportEvent>;

    fn disconnect(&mut self);

    /// Peer name for diagnostics.
    fn peer(&self) -> String;
}

/// Client connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
}

/// Stream client settings.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub topic: String,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on each transport wait, so cancellation is noticed.
    pub poll_timeout: Duration,
}

impl StreamConfig {
    pub fn from_settings(settings: &MqttSettings) -> Self {
        Self {
            topic: settings.topic.clone(),
            min_delay: settings.min_delay(),
            max_delay: settings.max_delay(),
            poll_timeout: Duration::from_millis(200),
        }
    }
}

/// Keeps a wildcard subscription alive and forwards decoded payloads.
///
/// `Disconnected -> Connecting -> Subscribed -> Streaming`. A transport
/// failure in any connected state goes back to `Disconnected` after a
/// `comm-exception` diagnostic and a backoff sleep. The delay resets once the
/// subscription is acknowledged.
pub struct StreamClient {
    config: StreamConfig,
    backoff: Backoff,
    state: StreamState,
    was_connected: bool,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Self {
        let backoff = Backoff::new(config.min_delay, config.max_delay);
        Self {
            config,
            backoff,
            state: StreamState::Disconnected,
            was_connected: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run until cancelled.
    ///
    /// Returns `Ok(())` on cancellation. Non-transport errors emit a final
    /// diagnostic and come back as [`WatchError::Fatal`]; a vanished bridge
    /// consumer comes back as [`WatchError::Disconnected`].
    pub fn run(
        &mut self,
        transport: &mut dyn Transport,
        codec: &dyn Codec,
        bridge: &BridgeSender,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!(peer = %transport.peer(), topic = %self.config.topic, "stream client starting");

        while !cancel.is_cancelled() {
            let step = match self.state {
                StreamState::Disconnected => {
                    self.state = StreamState::Connecting;
                    self.was_connected = false;
                    debug!(peer = %transport.peer(), "connecting");
                    transport.connect()
                }
                _ => self.poll_once(transport, codec, bridge),
            };

            if let Err(e) = step {
                if matches!(e, WatchError::Disconnected(_)) {
                    transport.disconnect();
                    return Err(e);
                }
                if !e.is_recoverable() {
                    return Err(self.fail(transport, bridge, e));
                }
                let delay = self.on_transport_error(transport, bridge, &e)?;
                if !cancel.sleep(delay) {
                    break;
                }
            }
        }

        transport.disconnect();
        self.state = StreamState::Disconnected;
        info!("stream client stopped");
        Ok(())
    }

    fn poll_once(
        &mut self,
        transport: &mut dyn Transport,
        codec: &dyn Codec,
        bridge: &BridgeSender,
    ) -> Result<()> {
        match transport.poll(self.config.poll_timeout)? {
            TransportEvent::Connected => {
                self.was_connected = true;
                transport.subscribe(&self.config.topic)?;
            }
            TransportEvent::Subscribed => {
                self.state = StreamState::Subscribed;
                self.backoff.reset();
                info!(peer = %transport.peer(), topic = %self.config.topic, "subscribed");
                bridge.diagnostic(Record::diagnostic(
                    DiagnosticKind::Subscribed,
                    transport.peer(),
                    format!("subscribed to {}", self.config.topic),
                    json!({ "PeerName": transport.peer(), "topic": self.config.topic }),
                ))?;
            }
            TransportEvent::Message { topic, payload } => {
                if self.state == StreamState::Subscribed {
                    self.state = StreamState::Streaming;
                }
                self.dispatch(codec, bridge, &topic, &payload)?;
            }
            TransportEvent::Idle => {}
        }
        Ok(())
    }

    fn dispatch(
        &self,
        codec: &dyn Codec,
        bridge: &BridgeSender,
        topic: &str,
        payload: &[u8],
    ) -> Result<()> {
        match decode_inbound(codec, payload) {
            Inbound::Event(record) => bridge.record(record),
            Inbound::Report(report) => bridge.report(report),
            Inbound::Ignored => {
                trace!(topic, "ignored message");
                Ok(())
            }
            Inbound::Failed(reason) => {
                let error = WatchError::Decode {
                    topic: topic.to_string(),
                    reason: reason.to_string(),
                };
                debug!(error = %error, "parse failure");
                let text = String::from_utf8_lossy(payload);
                let truncated: String = text.chars().take(MAX_DIAGNOSTIC_PAYLOAD).collect();
                bridge.diagnostic(Record::diagnostic(
                    DiagnosticKind::ParseException,
                    topic,
                    format!("topic {topic}: {reason}"),
                    json!({ "topic": topic, "payload": truncated, "exception": reason.to_string() }),
                ))
            }
        }
    }

    /// Report a recoverable failure and return the delay before reconnecting.
    fn on_transport_error(
        &mut self,
        transport: &mut dyn Transport,
        bridge: &BridgeSender,
        error: &WatchError,
    ) -> Result<Duration> {
        let delay = self.backoff.on_failure();
        let was_connected = self.was_connected;
        transport.disconnect();
        self.state = StreamState::Disconnected;

        warn!(
            peer = %transport.peer(),
            was_connected,
            next_delay_secs = delay.as_secs_f64(),
            error = %error,
            "stream transport failure"
        );
        bridge.diagnostic(Record::diagnostic(
            DiagnosticKind::CommException,
            transport.peer(),
            error.to_string(),
            comm_exception_fields(
                &transport.peer(),
                was_connected,
                delay.as_secs_f64(),
                true,
                &error.to_string(),
            ),
        ))?;
        Ok(delay)
    }

    fn fail(&mut self, transport: &mut dyn Transport, bridge: &BridgeSender, error: WatchError) -> WatchError {
        error!(peer = %transport.peer(), error = %error, "stream client failed");
        let record = Record::diagnostic(
            DiagnosticKind::CommException,
            transport.peer(),
            error.to_string(),
            comm_exception_fields(&transport.peer(), self.was_connected, -1.0, false, &error.to_string()),
        );
        if bridge.diagnostic(record).is_err() {
            debug!("diagnostic consumer gone");
        }
        transport.disconnect();
        self.state = StreamState::Disconnected;
        match error {
            WatchError::Fatal(_) => error,
            other => WatchError::Fatal(other.to_string()),
        }
    }
}
