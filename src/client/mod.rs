//! Client side of the relay protocol.
//!
//! [`ClientSession`] holds everything a chat client keeps locally: its own
//! key pair, the roster of online peers, and the peers' public keys. It is
//! transport-agnostic: feed it [`ServerEvent`]s and send back the
//! [`ClientRequest`]s it returns. [`ClientConnection`] carries both over a
//! WebSocket.
//!
//! # Key exchange
//!
//! Keys are fetched eagerly. Every peer listed in `online_users` or
//! announced by `user_online` is asked for its key, and every
//! `public_key_request` is answered with our own key. By the time a user
//! wants to write to someone, the key is normally already cached.
//!
//! Cryptographic failures never leave the client. They are logged and
//! surfaced as [`ClientNotice::Undecryptable`].

// Rust guideline compliant 2026-02

pub mod connection;
pub mod peer_keys;

use std::collections::BTreeSet;

pub use connection::ClientConnection;
pub use peer_keys::PeerKeyCache;

use crate::crypto::{self, KeyPair};
use crate::error::CryptoError;
use crate::protocol::{ClientRequest, ServerEvent};

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotice {
    /// Outcome of our registration.
    Registered {
        /// Whether we are online.
        ok: bool,
    },
    /// Outcome of a credential change.
    CredentialChanged {
        /// Whether the new proof was stored.
        ok: bool,
    },
    /// Peers already online when we registered.
    Roster(Vec<String>),
    /// A peer came online.
    PeerOnline(String),
    /// A peer went offline.
    PeerOffline(String),
    /// A peer's public key was cached.
    PeerKey(String),
    /// A decrypted message.
    Message {
        /// Sender identity as stamped by the relay.
        from: String,
        /// Plaintext.
        text: String,
    },
    /// A message or key from `from` could not be used.
    Undecryptable {
        /// Sender identity as stamped by the relay.
        from: String,
        /// What went wrong.
        error: CryptoError,
    },
    /// Notice text from the relay.
    System(String),
}

/// Result of handling one server event.
#[derive(Debug, Default)]
pub struct Reaction {
    /// Requests to send back to the relay, in order.
    pub replies: Vec<ClientRequest>,
    /// Notice for the user, if any.
    pub notice: Option<ClientNotice>,
}

impl Reaction {
    fn notice(notice: ClientNotice) -> Self {
        Self {
            replies: Vec::new(),
            notice: Some(notice),
        }
    }
}

/// Local state of one chat client.
#[derive(Debug)]
pub struct ClientSession {
    identity: String,
    keys: KeyPair,
    exported_key: String,
    peers: PeerKeyCache,
    roster: BTreeSet<String>,
}

impl ClientSession {
    /// Start a session for `identity` with a freshly generated key pair.
    pub fn new(identity: impl Into<String>) -> Result<Self, CryptoError> {
        Ok(Self::with_key_pair(identity, KeyPair::generate()?))
    }

    /// Start a session with an existing key pair.
    pub fn with_key_pair(identity: impl Into<String>, keys: KeyPair) -> Self {
        let exported_key = keys.export_public_key();
        Self {
            identity: identity.into(),
            keys,
            exported_key,
            peers: PeerKeyCache::new(),
            roster: BTreeSet::new(),
        }
    }

    /// Our identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Peers currently known to be online.
    pub fn roster(&self) -> &BTreeSet<String> {
        &self.roster
    }

    /// Cached peer keys.
    pub fn peer_keys(&self) -> &PeerKeyCache {
        &self.peers
    }

    /// Our exported public key.
    pub fn public_key_jwk(&self) -> &str {
        &self.exported_key
    }

    /// Registration request for our identity.
    pub fn register(&self, proof: &str) -> ClientRequest {
        ClientRequest::Register {
            identity: self.identity.clone(),
            proof: proof.to_string(),
        }
    }

    /// Credential change request, or `None` for an empty proof.
    pub fn change_credential(&self, proof: &str) -> Option<ClientRequest> {
        if proof.trim().is_empty() {
            return None;
        }
        Some(ClientRequest::ChangeCredential {
            proof: proof.to_string(),
        })
    }

    /// Encrypt `text` for `recipient` using their cached key.
    ///
    /// # Errors
    ///
    /// [`CryptoError::UnknownPeer`] if no key has been received from
    /// `recipient` yet.
    pub fn compose(&self, recipient: &str, text: &str) -> Result<ClientRequest, CryptoError> {
        let key = self.peers.require(recipient)?;
        let envelope = crypto::encrypt(text, key)?;
        Ok(ClientRequest::SendEncryptedMessage {
            recipient: recipient.to_string(),
            envelope: envelope.encode(),
        })
    }

    /// Update local state for one server event.
    pub fn handle_event(&mut self, event: ServerEvent) -> Reaction {
        match event {
            ServerEvent::RegisterResult { ok } => Reaction::notice(ClientNotice::Registered { ok }),
            ServerEvent::ChangeCredentialResult { ok } => {
                Reaction::notice(ClientNotice::CredentialChanged { ok })
            }
            ServerEvent::SystemMessage { text } => Reaction::notice(ClientNotice::System(text)),
            ServerEvent::OnlineUsers { users } => {
                let users: Vec<String> = users
                    .into_iter()
                    .filter(|user| *user != self.identity)
                    .collect();
                self.roster = users.iter().cloned().collect();
                Reaction {
                    replies: users.iter().map(|user| self.key_request(user)).collect(),
                    notice: Some(ClientNotice::Roster(users)),
                }
            }
            ServerEvent::UserOnline { identity } => {
                if identity == self.identity {
                    return Reaction::default();
                }
                self.roster.insert(identity.clone());
                Reaction {
                    replies: vec![self.key_request(&identity)],
                    notice: Some(ClientNotice::PeerOnline(identity)),
                }
            }
            ServerEvent::UserOffline { identity } => {
                self.roster.remove(&identity);
                Reaction::notice(ClientNotice::PeerOffline(identity))
            }
            ServerEvent::PublicKeyRequest { from } => {
                log::debug!("[Client] Sending our key to {from}");
                Reaction {
                    replies: vec![ClientRequest::SendPublicKey {
                        recipient: from,
                        key: self.exported_key.clone(),
                    }],
                    notice: None,
                }
            }
            ServerEvent::PublicKey { from, key } => match self.peers.insert_jwk(&from, &key) {
                Ok(()) => {
                    log::debug!("[Client] Cached key for {from}");
                    Reaction::notice(ClientNotice::PeerKey(from))
                }
                Err(error) => {
                    log::warn!("[Client] Rejected key from {from}: {error}");
                    Reaction::notice(ClientNotice::Undecryptable { from, error })
                }
            },
            ServerEvent::EncryptedMessage { from, envelope } => {
                match self.keys.decrypt_blob(&envelope) {
                    Ok(text) => Reaction::notice(ClientNotice::Message { from, text }),
                    Err(error) => {
                        log::warn!(
                            "[Client] Could not decrypt {}-byte envelope from {from}: {error}",
                            envelope.len()
                        );
                        Reaction::notice(ClientNotice::Undecryptable { from, error })
                    }
                }
            }
        }
    }

    fn key_request(&self, target: &str) -> ClientRequest {
        ClientRequest::RequestPublicKey {
            target: target.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_support::{other_key_pair, shared_key_pair};

    fn alice() -> ClientSession {
        ClientSession::with_key_pair("alice", KeyPair::generate().unwrap())
    }

    fn bob_key() -> String {
        shared_key_pair().export_public_key()
    }

    #[test]
    fn test_roster_requests_every_key() {
        let mut session = alice();
        let reaction = session.handle_event(ServerEvent::OnlineUsers {
            users: vec!["bob".to_string(), "carol".to_string()],
        });

        assert_eq!(
            reaction.replies,
            vec![
                ClientRequest::RequestPublicKey {
                    target: "bob".to_string()
                },
                ClientRequest::RequestPublicKey {
                    target: "carol".to_string()
                },
            ]
        );
        assert_eq!(session.roster().len(), 2);
    }

    #[test]
    fn test_presence_updates_roster() {
        let mut session = alice();
        let reaction = session.handle_event(ServerEvent::UserOnline {
            identity: "bob".to_string(),
        });
        assert_eq!(reaction.replies.len(), 1);
        assert_eq!(reaction.notice, Some(ClientNotice::PeerOnline("bob".to_string())));
        assert!(session.roster().contains("bob"));

        session.handle_event(ServerEvent::PublicKey {
            from: "bob".to_string(),
            key: bob_key(),
        });
        session.handle_event(ServerEvent::UserOffline {
            identity: "bob".to_string(),
        });
        assert!(!session.roster().contains("bob"));
        // Key stays until overwritten.
        assert!(session.peer_keys().contains("bob"));
    }

    #[test]
    fn test_own_presence_ignored() {
        let mut session = alice();
        let reaction = session.handle_event(ServerEvent::UserOnline {
            identity: "alice".to_string(),
        });
        assert!(reaction.replies.is_empty());
        assert!(session.roster().is_empty());
    }

    #[test]
    fn test_key_request_answered_with_own_key() {
        let mut session = alice();
        let reaction = session.handle_event(ServerEvent::PublicKeyRequest {
            from: "bob".to_string(),
        });
        assert_eq!(
            reaction.replies,
            vec![ClientRequest::SendPublicKey {
                recipient: "bob".to_string(),
                key: session.public_key_jwk().to_string(),
            }]
        );
        assert!(reaction.notice.is_none());
    }

    #[test]
    fn test_compose_requires_cached_key() {
        let session = alice();
        assert_eq!(
            session.compose("bob", "hi").unwrap_err(),
            CryptoError::UnknownPeer("bob".to_string())
        );
    }

    #[test]
    fn test_compose_and_decrypt_between_sessions() {
        let mut alice = alice();
        let mut bob = ClientSession::with_key_pair("bob", KeyPair::generate().unwrap());

        alice.handle_event(ServerEvent::PublicKey {
            from: "bob".to_string(),
            key: bob.public_key_jwk().to_string(),
        });
        let ClientRequest::SendEncryptedMessage {
            recipient,
            envelope,
        } = alice.compose("bob", "Hello Bob").unwrap()
        else {
            panic!("expected an encrypted message");
        };
        assert_eq!(recipient, "bob");
        assert!(!envelope.contains("Hello Bob"));

        let reaction = bob.handle_event(ServerEvent::EncryptedMessage {
            from: "alice".to_string(),
            envelope,
        });
        assert_eq!(
            reaction.notice,
            Some(ClientNotice::Message {
                from: "alice".to_string(),
                text: "Hello Bob".to_string(),
            })
        );
    }

    #[test]
    fn test_message_for_someone_else_is_undecryptable() {
        let mut session = alice();
        let envelope = crypto::encrypt("not for alice", other_key_pair().public_key())
            .unwrap()
            .encode();

        let reaction = session.handle_event(ServerEvent::EncryptedMessage {
            from: "mallory".to_string(),
            envelope,
        });
        assert_eq!(
            reaction.notice,
            Some(ClientNotice::Undecryptable {
                from: "mallory".to_string(),
                error: CryptoError::UnwrapFailure,
            })
        );
        assert!(reaction.replies.is_empty());
    }

    #[test]
    fn test_garbage_envelope_is_undecryptable() {
        let mut session = alice();
        let reaction = session.handle_event(ServerEvent::EncryptedMessage {
            from: "bob".to_string(),
            envelope: "not even json".to_string(),
        });
        assert!(matches!(
            reaction.notice,
            Some(ClientNotice::Undecryptable {
                error: CryptoError::MalformedEnvelope(_),
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_key_keeps_previous() {
        let mut session = alice();
        session.handle_event(ServerEvent::PublicKey {
            from: "bob".to_string(),
            key: bob_key(),
        });
        let reaction = session.handle_event(ServerEvent::PublicKey {
            from: "bob".to_string(),
            key: "{}".to_string(),
        });

        assert!(matches!(
            reaction.notice,
            Some(ClientNotice::Undecryptable {
                error: CryptoError::MalformedKey(_),
                ..
            })
        ));
        assert_eq!(
            session.peer_keys().get("bob"),
            Some(shared_key_pair().public_key())
        );
    }

    #[test]
    fn test_empty_credential_change_refused_locally() {
        let session = alice();
        assert!(session.change_credential("").is_none());
        assert!(session.change_credential("   ").is_none());
        assert_eq!(
            session.change_credential("x2"),
            Some(ClientRequest::ChangeCredential {
                proof: "x2".to_string()
            })
        );
    }
}
