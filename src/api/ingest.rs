//! Ingestion endpoint
//!
//! One WebSocket per agent. The first frame must be a handshake carrying
//! the shared secret; afterwards every frame is validated on its own and
//! answered with exactly one reply string. A bad secret on a payload frame
//! is reported but leaves the connection open.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::Sample;
use crate::actors::messages::IngestItem;
use crate::api::state::CollectorState;
use crate::protocol::Reply;

/// Validates frames and feeds accepted samples into the ingestion queue
#[derive(Clone)]
pub struct Gatekeeper {
    secret: Arc<str>,
    queue: UnboundedSender<IngestItem>,
}

impl Gatekeeper {
    pub fn new(secret: impl Into<Arc<str>>, queue: UnboundedSender<IngestItem>) -> Self {
        Self {
            secret: secret.into(),
            queue,
        }
    }

    fn secret_matches(&self, envelope: &Value) -> bool {
        envelope.get("secret").and_then(Value::as_str) == Some(&*self.secret)
    }

    /// Checks the first frame of a connection. Anything that is not a JSON
    /// object carrying the right secret fails.
    pub fn authenticate(&self, frame: &str) -> Reply {
        match serde_json::from_str::<Value>(frame) {
            Ok(envelope) if self.secret_matches(&envelope) => Reply::Authenticated,
            _ => Reply::AuthenticationFailed,
        }
    }

    /// Validates a payload frame and enqueues its sample
    pub fn accept(&self, frame: &str, peer: Option<SocketAddr>) -> Reply {
        let envelope: Value = match serde_json::from_str(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("malformed frame from {peer:?}: {e}");
                return Reply::InvalidJson;
            }
        };

        if !self.secret_matches(&envelope) {
            warn!("frame with invalid secret from {peer:?}");
            return Reply::InvalidSecret;
        }

        let Some(data) = envelope.get("data") else {
            debug!("frame without data from {peer:?}");
            return Reply::Error;
        };

        let sample = match Sample::deserialize(data) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("undecodable sample from {peer:?}: {e}");
                return Reply::Error;
            }
        };

        match self.queue.send(IngestItem { sample, peer }) {
            Ok(()) => Reply::Ack,
            Err(_) => {
                warn!("ingestion queue is closed");
                Reply::Error
            }
        }
    }
}

/// GET /ingest
pub async fn ingest_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<CollectorState>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_agent(socket, state.gatekeeper, peer))
}

enum Inbound {
    Frame(String),
    Undecodable,
}

async fn next_frame(socket: &mut WebSocket) -> Option<Inbound> {
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => return Some(Inbound::Frame(text)),
            Ok(Message::Binary(bytes)) => {
                return Some(match String::from_utf8(bytes) {
                    Ok(text) => Inbound::Frame(text),
                    Err(_) => Inbound::Undecodable,
                });
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                debug!("transport error: {e}");
                return None;
            }
        }
    }
    None
}

async fn reply(socket: &mut WebSocket, reply: Reply) -> bool {
    socket
        .send(Message::Text(reply.as_str().to_string()))
        .await
        .is_ok()
}

#[instrument(skip(socket, gatekeeper))]
async fn handle_agent(mut socket: WebSocket, gatekeeper: Gatekeeper, peer: Option<SocketAddr>) {
    info!("agent connected");

    let verdict = match next_frame(&mut socket).await {
        Some(Inbound::Frame(frame)) => gatekeeper.authenticate(&frame),
        Some(Inbound::Undecodable) => Reply::AuthenticationFailed,
        None => {
            debug!("agent left before the handshake");
            return;
        }
    };

    if !reply(&mut socket, verdict).await {
        return;
    }
    if verdict != Reply::Authenticated {
        warn!("handshake rejected");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    debug!("agent authenticated");

    while let Some(inbound) = next_frame(&mut socket).await {
        let verdict = match inbound {
            Inbound::Frame(frame) => gatekeeper.accept(&frame, peer),
            Inbound::Undecodable => Reply::InvalidJson,
        };

        if !reply(&mut socket, verdict).await {
            break;
        }
    }

    info!("agent disconnected");
}
