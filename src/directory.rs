//! Connection directory: who is online and how to reach them.
//!
//! A bidirectional map between identities and session handles with O(1)
//! lookup in both directions. The session→identity index is the only
//! authority for "who is the caller"; identities supplied by clients are
//! never trusted.
//!
//! # Invariant
//!
//! At most one session per identity and at most one identity per session.
//! Both indices are updated together in every mutation, so they never
//! disagree.
//!
//! The directory itself is a plain value. The hub task owns it exclusively,
//! which serialises every read and write (see [`crate::hub`]).

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::DirectoryError;

/// Opaque per-connection handle issued by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a transport-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a unique id using a monotonic counter + random suffix.
    pub fn generate(prefix: &str) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let rand: u16 = rand::random();
        Self(format!("{prefix}:{seq:x}{rand:04x}"))
    }

    /// Token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bidirectional identity ↔ session table.
#[derive(Debug, Default)]
pub struct Directory {
    by_identity: HashMap<String, SessionId>,
    by_session: HashMap<SessionId, String>,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `identity` to `session`.
    ///
    /// Fails without touching either index if the identity is already
    /// online or the session is already bound to an identity.
    pub fn register(&mut self, identity: &str, session: SessionId) -> Result<(), DirectoryError> {
        if self.by_identity.contains_key(identity) {
            return Err(DirectoryError::AlreadyOnline(identity.to_string()));
        }
        if let Some(bound) = self.by_session.get(&session) {
            return Err(DirectoryError::SessionBound {
                session: session.to_string(),
                identity: bound.clone(),
            });
        }

        self.by_identity.insert(identity.to_string(), session.clone());
        self.by_session.insert(session, identity.to_string());
        Ok(())
    }

    /// Remove the entry for `session`, returning the identity it freed.
    ///
    /// Unknown sessions are a no-op, so repeated calls are safe.
    pub fn unregister_by_session(&mut self, session: &SessionId) -> Option<String> {
        let identity = self.by_session.remove(session)?;
        self.by_identity.remove(&identity);
        Some(identity)
    }

    /// Session currently registered for `identity`.
    pub fn lookup_session(&self, identity: &str) -> Option<&SessionId> {
        self.by_identity.get(identity)
    }

    /// Identity registered on `session`.
    pub fn lookup_identity(&self, session: &SessionId) -> Option<&str> {
        self.by_session.get(session).map(String::as_str)
    }

    /// Snapshot of every registered identity except `excluding`.
    pub fn list_others(&self, excluding: &str) -> BTreeSet<String> {
        self.by_identity
            .keys()
            .filter(|identity| identity.as_str() != excluding)
            .cloned()
            .collect()
    }

    /// Sessions of every registered identity except `excluding`.
    pub fn sessions_except(&self, excluding: &str) -> impl Iterator<Item = &SessionId> + '_ {
        let excluding = excluding.to_string();
        self.by_identity
            .iter()
            .filter(move |(identity, _)| **identity != excluding)
            .map(|(_, session)| session)
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    /// Check if nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.by_identity.len(), self.by_session.len());
        for (identity, session) in &self.by_identity {
            assert_eq!(self.by_session.get(session), Some(identity));
        }
    }
}
