//! Push adapter: the service's Socket.IO event stream over a websocket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::protocol::ClientMessage;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::socketio::{self, Handshake, Packet};
use crate::{
    controller::{ControllerEvent, ControllerHandle},
    error::ClientError,
};

/// Derive the Socket.IO websocket URL from the service base URL.
pub fn socket_url(server_url: &str) -> Result<String, ClientError> {
    let server_url = server_url.trim_end_matches('/');
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(ClientError::validation(
            "server_url must start with http:// or https://",
        ));
    };
    Ok(format!("{ws_url}/socket.io/?EIO=4&transport=websocket"))
}

/// Keep a socket open to the service, forwarding events to the controller.
///
/// Reconnects after `reconnect_delay` whenever the socket drops. Returns once
/// the controller stops accepting events.
pub async fn run_push_channel(url: String, reconnect_delay: Duration, events: ControllerHandle) {
    while !events.is_closed() {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                debug!(url = %url, "push socket opened");
                if !drive(stream, &events).await {
                    return;
                }
            }
            Err(err) => debug!(url = %url, "push channel connect failed: {err}"),
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Run one socket until it drops. Returns `false` once the controller is gone.
async fn drive(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: &ControllerHandle,
) -> bool {
    let (mut writer, mut reader) = stream.split();
    let mut window = Handshake::default().liveness_window();
    let mut joined = false;

    loop {
        let text = match timeout(window, reader.next()).await {
            Err(_) => {
                warn!("push channel missed its heartbeat");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(err))) => {
                warn!("push channel receive failed: {err}");
                break;
            }
        };

        let reply = match socketio::decode(&text) {
            Ok(Packet::Open(handshake)) => {
                window = handshake.liveness_window();
                Some(socketio::CONNECT.to_string())
            }
            Ok(Packet::Ping) => Some(socketio::PONG.to_string()),
            Ok(Packet::Connected) => {
                joined = true;
                info!("push channel connected");
                if !events.send(ControllerEvent::PushConnected) {
                    return false;
                }
                match socketio::encode(&ClientMessage::RequestStatus) {
                    Ok(frame) => Some(frame),
                    Err(err) => {
                        warn!("failed to encode status request: {err}");
                        None
                    }
                }
            }
            Ok(Packet::Event(event)) => {
                if !events.send(ControllerEvent::Push(event)) {
                    return false;
                }
                None
            }
            Ok(Packet::ConnectError(message)) => {
                warn!(%message, "push namespace refused the connection");
                break;
            }
            Ok(Packet::Close | Packet::Disconnected) => break,
            Ok(Packet::Ignored) => None,
            Err(err) => {
                warn!("ignoring unrecognized push frame: {err}");
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(err) = writer.send(Message::Text(reply)).await {
                warn!("push channel send failed: {err}");
                break;
            }
        }
    }

    !joined || events.send(ControllerEvent::PushDisconnected)
}

#[cfg(test)]
#[path = "../tests/push_tests.rs"]
mod tests;
