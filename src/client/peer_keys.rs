//! Cache of peers' public keys, keyed by identity.
//!
//! Entries are replaced whenever a peer sends a new key and survive the
//! peer going offline. A key that fails to import leaves the cache as it
//! was.

use std::collections::HashMap;

use rsa::RsaPublicKey;

use crate::envelope::import_public_key;
use crate::error::CryptoError;

/// Imported public keys of peers.
#[derive(Debug, Default)]
pub struct PeerKeyCache {
    keys: HashMap<String, RsaPublicKey>,
}

impl PeerKeyCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Import `jwk` for `identity`, replacing any previous key.
    pub fn insert_jwk(&mut self, identity: &str, jwk: &str) -> Result<(), CryptoError> {
        let key = import_public_key(jwk)?;
        self.keys.insert(identity.to_string(), key);
        Ok(())
    }

    /// Cached key for `identity`.
    pub fn get(&self, identity: &str) -> Option<&RsaPublicKey> {
        self.keys.get(identity)
    }

    /// Whether a key is cached for `identity`.
    pub fn contains(&self, identity: &str) -> bool {
        self.keys.contains_key(identity)
    }

    /// Cached key for `identity`, or [`CryptoError::UnknownPeer`].
    pub fn require(&self, identity: &str) -> Result<&RsaPublicKey, CryptoError> {
        self.get(identity)
            .ok_or_else(|| CryptoError::UnknownPeer(identity.to_string()))
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if no keys are cached.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
