//! WebSocket relay server.
//!
//! Binds a TCP listener and upgrades every accepted connection to a
//! WebSocket. Each connection gets a fresh [`SessionId`] and a pair of
//! tasks (see [`connection`]) bridging the socket and the hub.

// Rust guideline compliant 2026-02

mod connection;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_MAX_MESSAGE_BYTES;
use crate::directory::SessionId;
use crate::hub::HubHandle;

/// Prefix for session ids issued by this transport.
pub const SESSION_PREFIX: &str = "ws";

/// Running relay listener.
///
/// Dropping the server leaves the accept loop running; call
/// [`Server::shutdown`] to stop accepting.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
}

impl Server {
    /// Bind `addr` and start accepting with the default frame limit.
    pub async fn bind(addr: &str, hub: HubHandle) -> Result<Self> {
        Self::bind_with_limit(addr, hub, DEFAULT_MAX_MESSAGE_BYTES).await
    }

    /// Bind `addr` and start accepting. Text frames larger than
    /// `max_message_bytes` are dropped. Frames four times larger are
    /// refused by the socket and end the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind_with_limit(
        addr: &str,
        hub: HubHandle,
        max_message_bytes: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;

        log::info!("[Server] Listening on ws://{local_addr}");

        let accept_handle = tokio::spawn(Self::accept_loop(listener, hub, max_message_bytes));
        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    /// Accept loop; one spawned task per connection.
    async fn accept_loop(listener: TcpListener, hub: HubHandle, max_message_bytes: usize) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if hub.is_closed() {
                        log::warn!("[Server] Hub stopped, no longer accepting");
                        break;
                    }
                    let session = SessionId::generate(SESSION_PREFIX);
                    log::info!("[Server] Connection from {peer} as {session}");
                    tokio::spawn(connection::serve(
                        session,
                        stream,
                        hub.clone(),
                        max_message_bytes,
                    ));
                }
                Err(e) => {
                    log::error!("[Server] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stop accepting new connections.
    ///
    /// Established sessions keep running until their peer disconnects or the
    /// hub shuts down.
    pub fn shutdown(self) {
        self.accept_handle.abort();
        log::info!("[Server] Stopped listening on {}", self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentials;
    use crate::hub::{Hub, SessionState};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
        let server = Server::bind("127.0.0.1:0", hub).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bind_invalid_address_fails() {
        let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
        assert!(Server::bind("not an address", hub).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_closes_session() {
        let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
        let server = Server::bind("127.0.0.1:0", hub.clone()).await.unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"register","identity":"alice"}"#.to_string(),
        ))
        .await
        .unwrap();

        let mut saw_ok = false;
        while let Some(Ok(Message::Text(text))) =
            tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
        {
            if text.contains("register_result") {
                saw_ok = text.contains("true");
                break;
            }
        }
        assert!(saw_ok);
        assert!(hub.online().await.contains("alice"));

        ws.close(None).await.unwrap();
        drop(ws);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !hub.online().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("alice never went offline");

        // Unknown ids report Closed.
        assert_eq!(
            hub.session_state(SessionId::new("ws:nope")).await,
            SessionState::Closed
        );
        server.shutdown();
    }

    type RawSocket = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Send a bare register frame and return the text of the result frame.
    async fn register_raw(ws: &mut RawSocket, identity: &str) -> String {
        ws.send(Message::Text(format!(
            r#"{{"type":"register","identity":"{identity}"}}"#
        )))
        .await
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    if text.contains("register_result") {
                        return text;
                    }
                }
            }
            panic!("connection ended before register_result");
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_frame_over_soft_limit_keeps_session() {
        let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
        let server = Server::bind_with_limit("127.0.0.1:0", hub.clone(), 64)
            .await
            .unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
        assert!(register_raw(&mut ws, "alice").await.contains("true"));

        // Dropped without a reply; the socket keeps answering afterwards.
        ws.send(Message::Text("y".repeat(200))).await.unwrap();
        assert!(register_raw(&mut ws, "alice").await.contains("false"));
        assert!(hub.online().await.contains("alice"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_frame_over_hard_limit_ends_session() {
        let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
        let server = Server::bind_with_limit("127.0.0.1:0", hub.clone(), 64)
            .await
            .unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();
        assert!(register_raw(&mut ws, "alice").await.contains("true"));

        // The relay may close before the write completes.
        let _ = ws.send(Message::Text("y".repeat(64 * 4 + 1))).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !hub.online().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("oversized frame did not end the session");
        server.shutdown();
    }
}
