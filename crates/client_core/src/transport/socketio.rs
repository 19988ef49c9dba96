//! Socket.IO (protocol v5) packets over the Engine.IO v4 websocket transport.
//!
//! Every websocket text frame is one Engine.IO packet whose first character is
//! its type. Socket.IO packets ride inside Engine.IO `message` packets, so a
//! named event in the default namespace reads `42["name",{...}]`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use shared::protocol::{ClientMessage, PushEvent};
use thiserror::Error;

/// Joins the default namespace. Sent once the server's open packet arrives.
pub const CONNECT: &str = "40";
/// Answer to a server heartbeat ping.
pub const PONG: &str = "3";

/// Event names the service pushes; anything else is skipped.
const PUSHED_EVENTS: [&str; 4] = [
    "connected",
    "log_message",
    "status_update",
    "operation_complete",
];

/// Heartbeat settings from the server's open packet, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub ping_interval: u64,
    pub ping_timeout: u64,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            ping_interval: 25_000,
            ping_timeout: 20_000,
        }
    }
}

impl Handshake {
    /// Longest silence before the server counts as gone.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    /// The default namespace accepted the connection.
    Connected,
    Disconnected,
    ConnectError(String),
    Event(PushEvent),
    /// Well formed but nothing the client acts on.
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type in {0:?}")]
    UnknownType(String),
    #[error("malformed packet payload: {0}")]
    Payload(String),
}

fn malformed(err: impl std::fmt::Display) -> PacketError {
    PacketError::Payload(err.to_string())
}

pub fn decode(frame: &str) -> Result<Packet, PacketError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = chars.as_str();
    match kind {
        '0' => serde_json::from_str(body)
            .map(Packet::Open)
            .map_err(malformed),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        // pong, upgrade, noop
        '3' | '5' | '6' => Ok(Packet::Ignored),
        '4' => decode_message(body),
        _ => Err(PacketError::UnknownType(frame.to_string())),
    }
}

fn decode_message(body: &str) -> Result<Packet, PacketError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let rest = chars.as_str();
    // Only the default namespace is joined.
    if rest.starts_with('/') {
        return Ok(Packet::Ignored);
    }
    match kind {
        '0' => Ok(Packet::Connected),
        '1' => Ok(Packet::Disconnected),
        '2' => decode_event(rest),
        // acks and binary attachments
        '3' | '5' | '6' => Ok(Packet::Ignored),
        '4' => Ok(Packet::ConnectError(connect_error_message(rest))),
        _ => Err(PacketError::UnknownType(format!("4{body}"))),
    }
}

fn decode_event(body: &str) -> Result<Packet, PacketError> {
    let args = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut args: Vec<Value> = serde_json::from_str(args).map_err(malformed)?;
    if args.is_empty() {
        return Err(malformed("event without a name"));
    }
    let name = match args.remove(0) {
        Value::String(name) => name,
        other => return Err(malformed(format!("event name {other}"))),
    };
    if !PUSHED_EVENTS.contains(&name.as_str()) {
        return Ok(Packet::Ignored);
    }
    let data = if args.is_empty() {
        Value::Null
    } else {
        args.swap_remove(0)
    };
    serde_json::from_value(json!({ "type": name, "payload": data }))
        .map(Packet::Event)
        .map_err(malformed)
}

fn connect_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Encode a client emit as an event packet in the default namespace.
pub fn encode(message: &ClientMessage) -> Result<String, PacketError> {
    let value = serde_json::to_value(message).map_err(malformed)?;
    let name = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("client message without an event name"))?;
    Ok(format!("42{}", json!([name])))
}

#[cfg(test)]
#[path = "../tests/socketio_tests.rs"]
mod tests;
