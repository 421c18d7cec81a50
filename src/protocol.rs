//! Message types exchanged between clients and the relay.
//!
//! Every message is a JSON object tagged by `type`:
//!
//! - [`ClientRequest`] - client → relay operations
//! - [`ServerEvent`] - relay → client results and pushes
//!
//! Key and envelope blobs are carried as opaque strings; the relay never
//! parses them.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

/// Operations a client can invoke on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Claim an identity for this connection.
    Register {
        /// Requested identity.
        identity: String,
        /// Credential proof; empty for none.
        #[serde(default)]
        proof: String,
    },
    /// Replace the caller's credential.
    ChangeCredential {
        /// New proof, stored unconditionally.
        proof: String,
    },
    /// Ask `target` to send us its public key.
    RequestPublicKey {
        /// Identity whose key is wanted.
        target: String,
    },
    /// Deliver our public key to `recipient`.
    SendPublicKey {
        /// Identity receiving the key.
        recipient: String,
        /// Exported JWK, opaque to the relay.
        key: String,
    },
    /// Forward an encrypted envelope to `recipient`.
    SendEncryptedMessage {
        /// Identity receiving the envelope.
        recipient: String,
        /// Encoded envelope, opaque to the relay.
        envelope: String,
    },
}

impl ClientRequest {
    /// Short name for logging, never including payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::ChangeCredential { .. } => "change_credential",
            Self::RequestPublicKey { .. } => "request_public_key",
            Self::SendPublicKey { .. } => "send_public_key",
            Self::SendEncryptedMessage { .. } => "send_encrypted_message",
        }
    }
}

/// Results and notifications pushed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Outcome of [`ClientRequest::Register`].
    RegisterResult {
        /// Whether the caller is now online.
        ok: bool,
    },
    /// Outcome of [`ClientRequest::ChangeCredential`].
    ChangeCredentialResult {
        /// Whether the credential was replaced.
        ok: bool,
    },
    /// Everyone else online at the moment the caller registered.
    OnlineUsers {
        /// Identities, excluding the caller.
        users: Vec<String>,
    },
    /// A peer came online.
    UserOnline {
        /// Identity that joined.
        identity: String,
    },
    /// A peer went offline.
    UserOffline {
        /// Identity that left.
        identity: String,
    },
    /// A peer wants our public key.
    PublicKeyRequest {
        /// Identity of the requester.
        from: String,
    },
    /// A peer's public key.
    PublicKey {
        /// Identity of the sender.
        from: String,
        /// Exported JWK.
        key: String,
    },
    /// An encrypted envelope from a peer.
    EncryptedMessage {
        /// Identity of the sender.
        from: String,
        /// Encoded envelope.
        envelope: String,
    },
    /// Human-readable notice from the relay.
    SystemMessage {
        /// Notice text.
        text: String,
    },
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_wire_shape() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"register","identity":"alice","proof":"x1"}"#)
                .unwrap();
        assert_eq!(
            req,
            ClientRequest::Register {
                identity: "alice".to_string(),
                proof: "x1".to_string(),
            }
        );
    }

    #[test]
    fn test_register_proof_defaults_to_empty() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"register","identity":"bob"}"#).unwrap();
        assert!(matches!(req, ClientRequest::Register { ref proof, .. } if proof.is_empty()));
    }

    #[test]
    fn test_unknown_request_type_rejected() {
        let result: Result<ClientRequest, _> =
            serde_json::from_str(r#"{"type":"broadcast","text":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_request_tags() {
        let req = ClientRequest::SendEncryptedMessage {
            recipient: "bob".to_string(),
            envelope: "{}".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "send_encrypted_message");
        assert_eq!(req.kind(), "send_encrypted_message");

        let req = ClientRequest::RequestPublicKey {
            target: "bob".to_string(),
        };
        assert_eq!(serde_json::to_value(&req).unwrap()["type"], "request_public_key");
    }

    #[test]
    fn test_server_event_tags() {
        let json = ServerEvent::OnlineUsers {
            users: vec!["alice".to_string()],
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "online_users");
        assert_eq!(value["users"][0], "alice");

        let event = ServerEvent::PublicKeyRequest {
            from: "bob".to_string(),
        };
        assert_eq!(
            serde_json::from_str::<ServerEvent>(&event.to_json().unwrap()).unwrap(),
            event
        );
    }
}
