//! Events delivered to the hub task.
//!
//! Connection tasks never touch shared state. They send one of these
//! through [`super::HubHandle`] and the hub applies it in arrival order.

// Rust guideline compliant 2026-02

use std::collections::BTreeSet;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use super::SessionState;
use crate::directory::SessionId;
use crate::protocol::{ClientRequest, ServerEvent};

/// Event from a connection task (or a local query) to the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A transport connection was accepted.
    SessionOpened {
        /// Handle issued by the transport.
        session: SessionId,
        /// Queue drained by the connection's write task.
        outbound: UnboundedSender<ServerEvent>,
    },

    /// A decoded request from a connected client.
    Request {
        /// Session the request arrived on.
        session: SessionId,
        /// The request itself.
        request: ClientRequest,
    },

    /// The connection ended (EOF, error, close frame or abort).
    SessionClosed {
        /// Session that ended.
        session: SessionId,
    },

    /// Ask for the protocol state of a session.
    QueryState {
        /// Session to inspect.
        session: SessionId,
        /// Reply channel.
        reply: oneshot::Sender<SessionState>,
    },

    /// Ask for the set of online identities.
    QueryOnline {
        /// Reply channel.
        reply: oneshot::Sender<BTreeSet<String>>,
    },

    /// Stop the hub loop.
    Shutdown,
}
