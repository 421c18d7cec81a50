//! Error taxonomy for the relay and the client-side cipher.
//!
//! Cryptographic errors are client-local: they are logged on the client and
//! never reported to the relay. Registration errors are the only failures a
//! connected client is told about.

use thiserror::Error;

/// Client-local failures of the envelope codec and hybrid cipher.
///
/// Every variant is terminal for the single message or key it concerns and
/// never for the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Public key blob has an unknown algorithm tag or is missing fields.
    #[error("malformed public key: {0}")]
    MalformedKey(String),
    /// Envelope blob is missing a field, mis-encoded, or unparseable.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// Wrapped key was not produced for this key pair, or is corrupt.
    #[error("failed to unwrap message key")]
    UnwrapFailure,
    /// AES-GCM tag did not verify.
    #[error("message authentication failed")]
    AuthenticationFailure,
    /// Decrypted bytes are not valid UTF-8.
    #[error("decrypted message is not valid text")]
    DecodingFailure,
    /// RSA key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    /// Symmetric encryption or key wrapping failed.
    #[error("failed to seal message: {0}")]
    WrapFailure(String),
    /// No public key has been received from this peer yet.
    #[error("no public key cached for {0}")]
    UnknownPeer(String),
}

/// Reasons a `register` request is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// Identity is empty or whitespace.
    #[error("identity must not be empty")]
    InvalidIdentity,
    /// Identity (or this session) already holds a live registration.
    #[error("{0} is already online")]
    AlreadyOnline(String),
    /// Wrong or missing proof for an identity with a stored credential.
    #[error("authentication rejected for {0}")]
    AuthenticationRejected(String),
}

/// Directory insert conflicts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Identity is already mapped to a live session.
    #[error("{0} is already online")]
    AlreadyOnline(String),
    /// Session is already mapped to another identity.
    #[error("session {session} is already registered as {identity}")]
    SessionBound {
        /// Session that was already bound.
        session: String,
        /// Identity it is bound to.
        identity: String,
    },
}

impl From<DirectoryError> for RegisterError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::AlreadyOnline(identity)
            | DirectoryError::SessionBound { identity, .. } => Self::AlreadyOnline(identity),
        }
    }
}
