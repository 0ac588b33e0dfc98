//! StreamUploader - pushes samples to the collector over one WebSocket
//!
//! ```text
//! DISCONNECTED ──connect()──▶ CONNECTING ──"authenticated"──▶ AUTHENTICATED
//!      ▲                          │                                │
//!      └──────── any I/O error, timeout or unexpected reply ◀──────┘
//! ```
//!
//! All link access goes through one async mutex, so there is at most one
//! frame in flight and the lazy reconnect inside `send` cannot race.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use super::messages::UploaderState;
use crate::Sample;
use crate::protocol::{Envelope, Reply};

type Link = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub enum UploadError {
    /// The transport could not be opened
    Connect(String),

    /// The collector answered the handshake with something other than `authenticated`
    HandshakeRejected(String),

    /// The collector answered a payload with something other than `ack`
    Rejected(String),

    /// No reply (or no connection) within the I/O timeout
    Timeout,

    /// The connection broke mid-exchange
    Transport(Box<tungstenite::Error>),

    /// The peer closed the connection
    Closed,

    /// The frame could not be encoded
    Encode(serde_json::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Connect(msg) => write!(f, "failed to connect: {msg}"),
            UploadError::HandshakeRejected(reply) => write!(f, "handshake rejected: '{reply}'"),
            UploadError::Rejected(reply) => write!(f, "sample rejected: '{reply}'"),
            UploadError::Timeout => write!(f, "timed out waiting for the collector"),
            UploadError::Transport(err) => write!(f, "transport error: {err}"),
            UploadError::Closed => write!(f, "connection closed by collector"),
            UploadError::Encode(err) => write!(f, "failed to encode frame: {err}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Transport(err) => Some(err.as_ref()),
            UploadError::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for UploadError {
    fn from(err: tungstenite::Error) -> Self {
        UploadError::Transport(Box::new(err))
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::Encode(err)
    }
}

pub struct StreamUploader {
    url: String,
    secret: String,
    io_timeout: Duration,
    link: Mutex<Option<Link>>,
    state: watch::Sender<UploaderState>,
}

impl StreamUploader {
    pub fn new(url: impl Into<String>, secret: impl Into<String>, io_timeout: Duration) -> Self {
        let (state, _) = watch::channel(UploaderState::Disconnected);

        Self {
            url: url.into(),
            secret: secret.into(),
            io_timeout,
            link: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> UploaderState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<UploaderState> {
        self.state.subscribe()
    }

    /// Opens a fresh authenticated connection, replacing any existing one
    pub async fn connect(&self) -> Result<(), UploadError> {
        let mut link = self.link.lock().await;
        self.reconnect(&mut link).await
    }

    /// Sends one sample and waits for `ack`. Connects first if needed.
    /// Any failure tears the connection down so the next call reconnects.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn send(&self, sample: &Sample) -> Result<(), UploadError> {
        let mut link = self.link.lock().await;

        if link.is_none() {
            self.reconnect(&mut link).await?;
        }

        let frame = serde_json::to_string(&Envelope::payload(self.secret.as_str(), sample))?;

        let outcome = match link.as_mut() {
            Some(stream) => exchange(stream, frame, self.io_timeout).await,
            None => Err(UploadError::Closed),
        };

        match outcome {
            Ok(reply) if Reply::parse(&reply) == Some(Reply::Ack) => {
                debug!("sample acknowledged");
                Ok(())
            }
            Ok(reply) => {
                warn!("collector replied '{reply}', dropping connection");
                self.teardown(&mut link).await;
                Err(UploadError::Rejected(reply))
            }
            Err(e) => {
                self.teardown(&mut link).await;
                Err(e)
            }
        }
    }

    pub async fn close(&self) {
        let mut link = self.link.lock().await;
        self.teardown(&mut link).await;
    }

    async fn reconnect(&self, link: &mut Option<Link>) -> Result<(), UploadError> {
        self.teardown(link).await;
        self.state.send_replace(UploaderState::Connecting);

        match self.open_authenticated().await {
            Ok(stream) => {
                *link = Some(stream);
                self.state.send_replace(UploaderState::Authenticated);
                info!("authenticated with collector at {}", self.url);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(UploaderState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open_authenticated(&self) -> Result<Link, UploadError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| UploadError::Connect(e.to_string()))?;
        if let Ok(agent) = concat!("hostwatch-agent/", env!("CARGO_PKG_VERSION")).parse() {
            request.headers_mut().insert("User-Agent", agent);
        }

        let (mut stream, _) = timeout(self.io_timeout, connect_async(request))
            .await
            .map_err(|_| UploadError::Timeout)?
            .map_err(|e| UploadError::Connect(e.to_string()))?;

        let handshake = serde_json::to_string(&Envelope::<Sample>::handshake(self.secret.as_str()))?;

        match exchange(&mut stream, handshake, self.io_timeout).await {
            Ok(reply) if Reply::parse(&reply) == Some(Reply::Authenticated) => Ok(stream),
            Ok(reply) => {
                let _ = stream.close(None).await;
                Err(UploadError::HandshakeRejected(reply))
            }
            Err(e) => {
                let _ = stream.close(None).await;
                Err(e)
            }
        }
    }

    async fn teardown(&self, link: &mut Option<Link>) {
        if let Some(mut stream) = link.take() {
            let _ = timeout(self.io_timeout, stream.close(None)).await;
            debug!("connection closed");
        }
        self.state.send_replace(UploaderState::Disconnected);
    }
}

/// Sends one text frame and returns the next text frame received
async fn exchange(stream: &mut Link, frame: String, io_timeout: Duration) -> Result<String, UploadError> {
    timeout(io_timeout, stream.send(Message::Text(frame)))
        .await
        .map_err(|_| UploadError::Timeout)??;

    timeout(io_timeout, next_text(stream))
        .await
        .map_err(|_| UploadError::Timeout)?
}

async fn next_text(stream: &mut Link) -> Result<String, UploadError> {
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => return Ok(text),
            Message::Close(_) => return Err(UploadError::Closed),
            _ => continue,
        }
    }
    Err(UploadError::Closed)
}

/// Drains the handoff slot into the uploader, one sample per period.
///
/// A sample that failed to upload is kept and retried on the next period
/// unless a fresher one is already waiting in the slot.
pub async fn run_upload_loop(
    uploader: Arc<StreamUploader>,
    mut slot: mpsc::Receiver<Sample>,
    period: Duration,
) {
    let mut pending: Option<Sample> = None;

    loop {
        let sample = match pending.take() {
            Some(stale) => slot.try_recv().unwrap_or(stale),
            None => match slot.recv().await {
                Some(sample) => sample,
                None => break,
            },
        };

        if let Err(e) = uploader.send(&sample).await {
            warn!("upload failed, retrying in {period:?}: {e}");
            pending = Some(sample);
        }

        tokio::time::sleep(period).await;
    }

    uploader.close().await;
    info!("upload loop stopped");
}
