//! Per-connection tasks for WebSocket sessions (hub side).
//!
//! - Read task: text frames → [`ClientRequest`] → `HubEvent::Request`
//! - Write task: outbound [`ServerEvent`] queue → JSON text frames
//!
//! The read side sends exactly one `SessionClosed` when it stops, whatever
//! the reason. The write side ends when the hub drops the session's
//! outbound sender or the socket fails.
//!
//! Two limits apply to inbound text. Frames over `max_message_bytes` are
//! logged and dropped. Frames over [`HARD_LIMIT_FACTOR`] times that are
//! refused by tungstenite before they are buffered, which ends the session.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::directory::SessionId;
use crate::hub::HubHandle;
use crate::protocol::{ClientRequest, ServerEvent};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Multiple of the soft frame limit at which the socket itself refuses input.
pub(crate) const HARD_LIMIT_FACTOR: usize = 4;

/// Socket limits for a given soft frame limit.
fn websocket_config(max_message_bytes: usize) -> WebSocketConfig {
    let hard_limit = max_message_bytes.saturating_mul(HARD_LIMIT_FACTOR);
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(hard_limit);
    config.max_frame_size = Some(hard_limit);
    config
}

/// Run one accepted connection to completion.
pub(crate) async fn serve(
    session: SessionId,
    stream: TcpStream,
    hub: HubHandle,
    max_message_bytes: usize,
) {
    let config = websocket_config(max_message_bytes);
    let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("[Server] WebSocket handshake failed for {session}: {e}");
            return;
        }
    };

    let (sink, source) = ws.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    if !hub.open_session(session.clone(), outbound_tx) {
        log::warn!("[Server] Hub stopped, dropping {session}");
        return;
    }

    tokio::spawn(write_loop(session.clone(), sink, outbound_rx));
    read_loop(&session, source, &hub, max_message_bytes).await;

    log::info!("[Server] Session closed: {session}");
    hub.close_session(session);
}

/// Decode frames and hand them to the hub until the peer goes away.
async fn read_loop(
    session: &SessionId,
    mut source: WsSource,
    hub: &HubHandle,
    max_message_bytes: usize,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if text.len() > max_message_bytes {
                    log::warn!(
                        "[Server] Dropping {}-byte frame from {session} (limit {max_message_bytes})",
                        text.len()
                    );
                    continue;
                }
                match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(request) => {
                        log::debug!("[Server] {session} -> {}", request.kind());
                        if !hub.request(session.clone(), request) {
                            log::warn!("[Server] Hub stopped, ending {session}");
                            return;
                        }
                    }
                    Err(e) => log::warn!("[Server] Ignoring malformed frame from {session}: {e}"),
                }
            }
            Ok(Message::Binary(data)) => {
                log::warn!(
                    "[Server] Ignoring {}-byte binary frame from {session}",
                    data.len()
                );
            }
            Ok(Message::Close(_)) => return,
            // Ping/pong are answered by tungstenite.
            Ok(_) => {}
            Err(e) => {
                log::debug!("[Server] Read error for {session}: {e}");
                return;
            }
        }
    }
}

/// Serialize queued events onto the socket in order.
async fn write_loop(
    session: SessionId,
    mut sink: WsSink,
    mut outbound: UnboundedReceiver<ServerEvent>,
) {
    while let Some(event) = outbound.recv().await {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("[Server] Failed to encode event for {session}: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json)).await {
            log::debug!("[Server] Write error for {session}: {e}");
            return;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_caps_at_multiple_of_limit() {
        let config = websocket_config(1024);
        assert_eq!(config.max_message_size, Some(4096));
        assert_eq!(config.max_frame_size, Some(4096));
    }

    #[test]
    fn test_websocket_config_saturates() {
        let config = websocket_config(usize::MAX);
        assert_eq!(config.max_message_size, Some(usize::MAX));
    }
}
