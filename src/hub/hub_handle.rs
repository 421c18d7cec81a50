//! Clonable handle for talking to the hub task.
//!
//! `HubHandle` wraps the hub's event channel. It is `Clone + Send + Sync`,
//! so every connection task gets its own copy. Sends never block; if the
//! hub has stopped they report `false` (or a closed/empty answer for
//! queries) instead of failing loudly.

use std::collections::BTreeSet;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use super::events::HubEvent;
use super::SessionState;
use crate::directory::SessionId;
use crate::protocol::{ClientRequest, ServerEvent};

/// Handle for sending events to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    event_tx: UnboundedSender<HubEvent>,
}

impl HubHandle {
    /// Wrap an event sender.
    #[must_use]
    pub fn new(event_tx: UnboundedSender<HubEvent>) -> Self {
        Self { event_tx }
    }

    /// Announce a new connection and its outbound queue.
    pub fn open_session(&self, session: SessionId, outbound: UnboundedSender<ServerEvent>) -> bool {
        self.event_tx
            .send(HubEvent::SessionOpened { session, outbound })
            .is_ok()
    }

    /// Submit a client request.
    pub fn request(&self, session: SessionId, request: ClientRequest) -> bool {
        self.event_tx
            .send(HubEvent::Request { session, request })
            .is_ok()
    }

    /// Announce that a connection ended.
    pub fn close_session(&self, session: SessionId) -> bool {
        self.event_tx
            .send(HubEvent::SessionClosed { session })
            .is_ok()
    }

    /// Protocol state of `session`; `Closed` if the hub is gone.
    pub async fn session_state(&self, session: SessionId) -> SessionState {
        let (reply, rx) = oneshot::channel();
        if self
            .event_tx
            .send(HubEvent::QueryState { session, reply })
            .is_err()
        {
            return SessionState::Closed;
        }
        rx.await.unwrap_or(SessionState::Closed)
    }

    /// Identities currently online; empty if the hub is gone.
    pub async fn online(&self) -> BTreeSet<String> {
        let (reply, rx) = oneshot::channel();
        if self.event_tx.send(HubEvent::QueryOnline { reply }).is_err() {
            return BTreeSet::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Ask the hub loop to stop.
    pub fn shutdown(&self) {
        let _ = self.event_tx.send(HubEvent::Shutdown);
    }

    /// Whether the hub task has stopped receiving.
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}
