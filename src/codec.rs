//! Payload decoding.
//!
//! Decoding is a closed, ordered set of attempts: a bare structured event
//! first, then a general message envelope. Callers get a tagged [`Inbound`]
//! back and never inspect payload types themselves.

use crate::types::{DeviceReport, Identity, Record, ReportKind, TimestampNs, EVENT_PREFIX};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a payload could not be decoded.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    fn new(msg: impl Into<String>) -> Self {
        DecodeError(msg.into())
    }
}

/// Result of decoding a general message envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Event(Record),
    Report(DeviceReport),
    /// A well-formed message of a kind the pipeline does not track.
    Other { type_name: String },
}

/// Outcome of decoding one inbound payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Event(Record),
    Report(DeviceReport),
    Ignored,
    Failed(DecodeError),
}

/// Wire decoder seam. Implementations turn raw bytes into typed records.
pub trait Codec: Send + Sync {
    /// Decode a bare structured event.
    fn decode_event(&self, payload: &[u8]) -> Result<Record, DecodeError>;

    /// Decode a general message envelope.
    fn decode_message(&self, payload: &[u8]) -> Result<Message, DecodeError>;
}

/// Try the structured-event decode, then the general message decode.
///
/// Fails only when both attempts fail; the error names both causes.
pub fn decode_inbound(codec: &dyn Codec, payload: &[u8]) -> Inbound {
    let event_err = match codec.decode_event(payload) {
        Ok(record) => return Inbound::Event(record),
        Err(e) => e,
    };
    match codec.decode_message(payload) {
        Ok(Message::Event(record)) => Inbound::Event(record),
        Ok(Message::Report(report)) => Inbound::Report(report),
        Ok(Message::Other { .. }) => Inbound::Ignored,
        Err(message_err) => Inbound::Failed(DecodeError(format!(
            "as event: {event_err}; as message: {message_err}"
        ))),
    }
}

/// Type name of the general message envelope.
pub const MESSAGE_TYPE_NAME: &str = "gw";

const BASE_FIELDS: [&str; 4] = ["MessageId", "TimeNS", "TypeName", "Src"];

/// JSON codec for the fleet's event and message formats.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, DecodeError> {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(DecodeError::new(format!(
                "expected JSON object, got {}",
                json_type(&other)
            ))),
            Err(e) => Err(DecodeError::new(format!("invalid JSON: {e}"))),
        }
    }

    fn event_from_object(
        mut obj: Map<String, Value>,
        fallback_src: Option<&str>,
    ) -> Result<Record, DecodeError> {
        let type_name = required_str(&obj, "TypeName")?.to_string();
        if type_name == MESSAGE_TYPE_NAME {
            return Err(DecodeError::new("message envelope is not an event"));
        }
        let identity = required_str(&obj, "MessageId")?.to_string();
        let time_ns = obj
            .get("TimeNS")
            .and_then(Value::as_i64)
            .ok_or_else(|| DecodeError::new("missing or non-integer field TimeNS"))?;
        let source = match obj.get("Src").and_then(Value::as_str) {
            Some(src) => src.to_string(),
            None => fallback_src
                .map(str::to_string)
                .ok_or_else(|| DecodeError::new("missing field Src"))?,
        };
        for field in BASE_FIELDS {
            obj.remove(field);
        }
        Ok(Record::new(
            Identity(identity),
            TimestampNs(time_ns),
            type_name,
            source,
            Value::Object(obj),
        ))
    }

    fn report_from_payload(
        kind: ReportKind,
        payload: Map<String, Value>,
        header_src: &str,
    ) -> Result<DeviceReport, DecodeError> {
        let device = payload
            .get("FromGNodeAlias")
            .and_then(Value::as_str)
            .unwrap_or(header_src)
            .to_string();
        if device.is_empty() {
            return Err(DecodeError::new("report has no device name"));
        }
        let report_time_ms = embedded_report_time(&payload)
            .ok_or_else(|| DecodeError::new("report has no embedded report time"))?;
        Ok(DeviceReport {
            device,
            kind,
            report_time_ms,
            body: Value::Object(payload),
        })
    }
}

impl Codec for JsonCodec {
    fn decode_event(&self, payload: &[u8]) -> Result<Record, DecodeError> {
        Self::event_from_object(Self::parse_object(payload)?, None)
    }

    fn decode_message(&self, payload: &[u8]) -> Result<Message, DecodeError> {
        let mut obj = Self::parse_object(payload)?;
        let type_name = required_str(&obj, "TypeName")?;
        if type_name != MESSAGE_TYPE_NAME {
            return Err(DecodeError::new(format!(
                "TypeName {type_name:?} is not a message envelope"
            )));
        }
        let header = match obj.remove("Header") {
            Some(Value::Object(h)) => h,
            _ => return Err(DecodeError::new("missing object field Header")),
        };
        let message_type = required_str(&header, "MessageType")?.to_string();
        let src = header.get("Src").and_then(Value::as_str).unwrap_or("").to_string();
        let payload = match obj.remove("Payload") {
            Some(Value::Object(p)) => p,
            _ => return Err(DecodeError::new("missing object field Payload")),
        };

        match report_kind(&message_type) {
            Some(kind) => Self::report_from_payload(kind, payload, &src).map(Message::Report),
            None if message_type.starts_with(EVENT_PREFIX.trim_end_matches('.')) => {
                let fallback = (!src.is_empty()).then_some(src.as_str());
                Self::event_from_object(payload, fallback).map(Message::Event)
            }
            None => Ok(Message::Other {
                type_name: message_type,
            }),
        }
    }
}

fn report_kind(message_type: &str) -> Option<ReportKind> {
    match message_type {
        "snapshot.spaceheat" => Some(ReportKind::Snapshot),
        "gt.sh.status" => Some(ReportKind::Status),
        _ => None,
    }
}

/// Report time in milliseconds, from whichever field the payload carries.
fn embedded_report_time(payload: &Map<String, Value>) -> Option<i64> {
    for key in ["SnapshotTimeUnixMs", "ReportTimeUnixMs"] {
        if let Some(ms) = payload.get(key).and_then(Value::as_i64) {
            return Some(ms);
        }
    }
    if let Some(ms) = payload
        .get("Snapshot")
        .and_then(|s| s.get("ReportTimeUnixMs"))
        .and_then(Value::as_i64)
    {
        return Some(ms);
    }
    payload
        .get("SlotStartUnixS")
        .and_then(Value::as_i64)
        .map(|s| s.saturating_mul(1000))
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a str, DecodeError> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::new(format!("missing string field {key}")))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
