//! Hub - owner of the directory and the relay state machine.
//!
//! One hub task owns the [`Directory`], the outbound queue of every live
//! session, and the credential guard. Connection tasks reach it only
//! through [`HubHandle`], so every read and write of the directory is
//! serialised by the hub's event loop (actor pattern). No locks are held
//! across tasks.
//!
//! # Session lifecycle
//!
//! ```text
//! SessionOpened ──► Unauthenticated ──register ok──► Online ──SessionClosed──► Closed
//!                         │  ▲                          │ ▲
//!                         └──┘ register refused         └─┘ key exchange, relay,
//!                                                           change_credential
//! ```
//!
//! # Ordering
//!
//! Events are applied one at a time in arrival order and every push is
//! queued on the recipient's unbounded outbound channel before the next
//! event is handled. Each recipient therefore sees pushes in the order the
//! hub decided them, and a `user_online` for an identity is only ever
//! queued after its directory entry exists.
//!
//! # Absent peers
//!
//! Key requests, key deliveries and envelopes addressed to an identity that
//! is not online are dropped silently. Presence is inherently racy; peers
//! resynchronise through later presence events.

// Rust guideline compliant 2026-02

pub mod events;
pub mod hub_handle;

use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub use events::HubEvent;
pub use hub_handle::HubHandle;

use crate::credentials::{self, CredentialGuard};
use crate::directory::{Directory, SessionId};
use crate::error::RegisterError;
use crate::protocol::{ClientRequest, ServerEvent};

/// Notice sent after a successful credential change.
pub const CREDENTIAL_CHANGED_NOTICE: &str = "Password changed successfully";

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not yet registered.
    Unauthenticated,
    /// Registered in the directory.
    Online,
    /// Disconnected (or never known to the hub).
    Closed,
}

/// Central relay state, driven by [`HubEvent`]s.
pub struct Hub {
    directory: Directory,
    sessions: HashMap<SessionId, UnboundedSender<ServerEvent>>,
    credentials: Box<dyn CredentialGuard>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sessions", &self.sessions.len())
            .field("online", &self.directory.len())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub backed by `credentials`.
    pub fn new(credentials: Box<dyn CredentialGuard>) -> Self {
        Self {
            directory: Directory::new(),
            sessions: HashMap::new(),
            credentials,
        }
    }

    /// Spawn the event loop on the current tokio runtime.
    ///
    /// The join handle yields the hub back after [`HubHandle::shutdown`] or
    /// once every handle has been dropped.
    pub fn spawn(self) -> (HubHandle, JoinHandle<Self>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(event_rx));
        (HubHandle::new(event_tx), task)
    }

    /// Process events until shutdown or until every sender is dropped.
    pub async fn run(mut self, mut events: UnboundedReceiver<HubEvent>) -> Self {
        log::info!("[Hub] Event loop started");
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        log::info!(
            "[Hub] Event loop stopped ({} session(s), {} online)",
            self.sessions.len(),
            self.directory.len()
        );
        self
    }

    /// Apply one event. Returns `false` when the loop should stop.
    pub fn handle_event(&mut self, event: HubEvent) -> bool {
        match event {
            HubEvent::SessionOpened { session, outbound } => self.open_session(session, outbound),
            HubEvent::Request { session, request } => self.handle_request(&session, request),
            HubEvent::SessionClosed { session } => self.close_session(&session),
            HubEvent::QueryState { session, reply } => {
                let _ = reply.send(self.state(&session));
            }
            HubEvent::QueryOnline { reply } => {
                let _ = reply.send(self.directory.list_others(""));
            }
            HubEvent::Shutdown => return false,
        }
        true
    }

    /// Protocol state of `session`.
    pub fn state(&self, session: &SessionId) -> SessionState {
        if self.directory.lookup_identity(session).is_some() {
            SessionState::Online
        } else if self.sessions.contains_key(session) {
            SessionState::Unauthenticated
        } else {
            SessionState::Closed
        }
    }

    /// Read-only view of the directory.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Read-only view of the credential guard.
    pub fn credentials(&self) -> &dyn CredentialGuard {
        self.credentials.as_ref()
    }

    fn open_session(&mut self, session: SessionId, outbound: UnboundedSender<ServerEvent>) {
        log::debug!("[Hub] Session opened: {session}");
        if self.sessions.insert(session.clone(), outbound).is_some() {
            log::warn!("[Hub] Session {session} opened twice, replaced outbound queue");
        }
    }

    fn close_session(&mut self, session: &SessionId) {
        self.sessions.remove(session);
        match self.directory.unregister_by_session(session) {
            Some(identity) => {
                log::info!("[Hub] {identity} went offline ({session})");
                self.broadcast_except(&identity, &ServerEvent::UserOffline {
                    identity: identity.clone(),
                });
            }
            None => log::debug!("[Hub] Session closed before registering: {session}"),
        }
    }

    fn handle_request(&mut self, session: &SessionId, request: ClientRequest) {
        if !self.sessions.contains_key(session) {
            log::warn!(
                "[Hub] Dropping {} from unknown session {session}",
                request.kind()
            );
            return;
        }

        match request {
            ClientRequest::Register { identity, proof } => {
                self.handle_register(session, &identity, &proof);
            }
            ClientRequest::ChangeCredential { proof } => {
                self.handle_change_credential(session, &proof);
            }
            ClientRequest::RequestPublicKey { target } => {
                self.forward(session, &target, "public key request", |from| {
                    ServerEvent::PublicKeyRequest { from }
                });
            }
            ClientRequest::SendPublicKey { recipient, key } => {
                self.forward(session, &recipient, "public key", |from| {
                    ServerEvent::PublicKey { from, key }
                });
            }
            ClientRequest::SendEncryptedMessage {
                recipient,
                envelope,
            } => {
                self.forward(session, &recipient, "encrypted message", |from| {
                    ServerEvent::EncryptedMessage { from, envelope }
                });
            }
        }
    }

    fn handle_register(&mut self, session: &SessionId, identity: &str, proof: &str) {
        match self.try_register(session, identity, proof) {
            Ok(others) => {
                log::info!(
                    "[Hub] {identity} is online ({session}), {} peer(s)",
                    others.len()
                );
                self.send(session, ServerEvent::OnlineUsers {
                    users: others.into_iter().collect(),
                });
                self.broadcast_except(identity, &ServerEvent::UserOnline {
                    identity: identity.to_string(),
                });
                self.send(session, ServerEvent::RegisterResult { ok: true });
            }
            Err(e) => {
                log::warn!("[Hub] Registration refused on {session}: {e}");
                self.send(session, ServerEvent::SystemMessage {
                    text: e.to_string(),
                });
                self.send(session, ServerEvent::RegisterResult { ok: false });
            }
        }
    }

    /// Validate, authenticate and insert. The snapshot is taken after the
    /// insert so it reflects the directory the new client joined.
    fn try_register(
        &mut self,
        session: &SessionId,
        identity: &str,
        proof: &str,
    ) -> Result<BTreeSet<String>, RegisterError> {
        if identity.trim().is_empty() {
            return Err(RegisterError::InvalidIdentity);
        }
        if let Some(current) = self.directory.lookup_identity(session) {
            return Err(RegisterError::AlreadyOnline(current.to_string()));
        }
        // Checked before the credential guard so a refused attempt never
        // claims a password on an identity someone else is using.
        if self.directory.lookup_session(identity).is_some() {
            return Err(RegisterError::AlreadyOnline(identity.to_string()));
        }

        credentials::authorize(self.credentials.as_mut(), identity, proof)?;
        self.directory.register(identity, session.clone())?;
        Ok(self.directory.list_others(identity))
    }

    fn handle_change_credential(&mut self, session: &SessionId, proof: &str) {
        let Some(identity) = self.directory.lookup_identity(session).map(str::to_string) else {
            log::debug!("[Hub] change_credential from unauthenticated session {session}");
            self.send(session, ServerEvent::ChangeCredentialResult { ok: false });
            return;
        };

        match self.credentials.set(&identity, proof) {
            Ok(()) => {
                log::info!("[Hub] Credential changed for {identity}");
                self.send(session, ServerEvent::SystemMessage {
                    text: CREDENTIAL_CHANGED_NOTICE.to_string(),
                });
                self.send(session, ServerEvent::ChangeCredentialResult { ok: true });
            }
            Err(e) => {
                log::error!("[Hub] Failed to change credential for {identity}: {e:#}");
                self.send(session, ServerEvent::ChangeCredentialResult { ok: false });
            }
        }
    }

    /// Deliver to `recipient`, stamped with the caller's directory identity.
    fn forward(
        &self,
        session: &SessionId,
        recipient: &str,
        what: &str,
        build: impl FnOnce(String) -> ServerEvent,
    ) {
        let Some(from) = self.directory.lookup_identity(session) else {
            log::debug!("[Hub] Dropping {what} from unauthenticated session {session}");
            return;
        };
        let Some(target) = self.directory.lookup_session(recipient) else {
            log::debug!("[Hub] Dropping {what} from {from}: {recipient} is offline");
            return;
        };
        log::debug!("[Hub] Forwarding {what} {from} -> {recipient}");
        self.send(target, build(from.to_string()));
    }

    fn send(&self, session: &SessionId, event: ServerEvent) {
        if let Some(outbound) = self.sessions.get(session) {
            if outbound.send(event).is_err() {
                log::debug!("[Hub] Outbound queue closed for {session}");
            }
        }
    }

    fn broadcast_except(&self, excluding: &str, event: &ServerEvent) {
        for session in self.directory.sessions_except(excluding) {
            self.send(session, event.clone());
        }
    }
}
