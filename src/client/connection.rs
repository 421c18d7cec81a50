//! WebSocket transport for [`ClientSession`].
//!
//! Thin wrapper around `tokio-tungstenite` that speaks the relay's JSON
//! protocol. [`ClientConnection::into_split`] yields independent
//! [`RelayWriter`] / [`RelayReader`] halves for use in `tokio::select!`
//! loops.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use super::{ClientNotice, ClientSession};
use crate::protocol::{ClientRequest, ServerEvent};

/// Concrete WebSocket stream type.
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Write half of a relay connection.
#[derive(Debug)]
pub struct RelayWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl RelayWriter {
    /// Send one request as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the send fails.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<()> {
        let json = serde_json::to_string(request).context("Failed to encode request")?;
        self.sink
            .send(tungstenite::Message::Text(json))
            .await
            .with_context(|| format!("WebSocket send of {} failed", request.kind()))
    }

    /// Send several requests in order.
    pub async fn send_all(&mut self, requests: &[ClientRequest]) -> Result<()> {
        for request in requests {
            self.send(request).await?;
        }
        Ok(())
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of a relay connection.
#[derive(Debug)]
pub struct RelayReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl RelayReader {
    /// Receive the next event, returning `None` when the relay closes.
    ///
    /// Control frames, binary frames and unparseable text are skipped.
    pub async fn recv(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => return Some(Ok(event)),
                        Err(e) => log::warn!("[Client] Ignoring unparseable frame: {e}"),
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(anyhow::anyhow!("WebSocket read error: {e}"))),
            }
        }
    }
}

/// Connected relay client.
#[derive(Debug)]
pub struct ClientConnection {
    writer: RelayWriter,
    reader: RelayReader,
}

impl ClientConnection {
    /// Open a WebSocket to the relay at `url` (`ws://`, `wss://`, or
    /// `http(s)://`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = http_to_ws_scheme(url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .with_context(|| format!("WebSocket connect to {url} failed"))?;
        log::info!("[Client] Connected to {url}");

        let (sink, stream) = ws_stream.split();
        Ok(Self {
            writer: RelayWriter { sink },
            reader: RelayReader { stream },
        })
    }

    /// Send one request.
    pub async fn send(&mut self, request: &ClientRequest) -> Result<()> {
        self.writer.send(request).await
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<Result<ServerEvent>> {
        self.reader.recv().await
    }

    /// Feed one event to `session` and send its replies.
    pub async fn dispatch(
        &mut self,
        session: &mut ClientSession,
        event: ServerEvent,
    ) -> Result<Option<ClientNotice>> {
        let reaction = session.handle_event(event);
        self.writer.send_all(&reaction.replies).await?;
        Ok(reaction.notice)
    }

    /// Register `session`'s identity and wait for the verdict.
    ///
    /// Events arriving before the result (the roster, early key requests)
    /// are handled on the way and their notices returned.
    ///
    /// # Errors
    ///
    /// Fails if the relay refuses the registration, naming its reason, or
    /// if the connection drops first.
    pub async fn register(
        &mut self,
        session: &mut ClientSession,
        proof: &str,
    ) -> Result<Vec<ClientNotice>> {
        self.send(&session.register(proof)).await?;

        let mut notices = Vec::new();
        let mut reason = None;
        while let Some(event) = self.recv().await {
            match self.dispatch(session, event?).await? {
                Some(ClientNotice::Registered { ok: true }) => return Ok(notices),
                Some(ClientNotice::Registered { ok: false }) => {
                    anyhow::bail!(
                        "Registration refused: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                }
                Some(ClientNotice::System(text)) => reason = Some(text),
                Some(notice) => notices.push(notice),
                None => {}
            }
        }
        anyhow::bail!("Connection closed before registration completed")
    }

    /// Split into independent halves.
    pub fn into_split(self) -> (RelayWriter, RelayReader) {
        (self.writer, self.reader)
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
