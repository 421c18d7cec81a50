//! Wire formats shared by every client: exported public keys and
//! encrypted message envelopes.
//!
//! # Public keys
//!
//! Public keys travel as JSON Web Keys, exactly as WebCrypto's
//! `exportKey("jwk", ...)` produces them for an RSA-OAEP/SHA-256 key:
//!
//! ```json
//! { "kty": "RSA", "alg": "RSA-OAEP-256", "n": "<base64url>", "e": "AQAB",
//!   "ext": true, "key_ops": ["encrypt"] }
//! ```
//!
//! `kty` and `alg` are closed enums: any other value fails with
//! [`CryptoError::MalformedKey`] instead of being partially parsed.
//!
//! # Envelopes
//!
//! An envelope is a JSON object with three independently base64-encoded
//! fields (standard alphabet, padded):
//!
//! ```json
//! { "key": "<RSA-OAEP wrapped AES key>", "iv": "<12-byte nonce>",
//!   "data": "<AES-GCM ciphertext || tag>" }
//! ```
//!
//! Unknown fields are rejected.

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64URL},
    Engine,
};
use rsa::{traits::PublicKeyParts, BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Smallest RSA modulus accepted for key wrapping, in bits.
pub const MIN_RSA_BITS: usize = 2048;

/// Key algorithm tag carried in the JWK `alg` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA-OAEP with SHA-256 and MGF1-SHA-256.
    #[serde(rename = "RSA-OAEP-256")]
    RsaOaep256,
}

/// Exported public key, tagged by key type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum PublicKeyJwk {
    /// RSA public key.
    #[serde(rename = "RSA")]
    Rsa {
        /// Wrapping algorithm the key is meant for.
        alg: KeyAlgorithm,
        /// Modulus, big-endian, base64url without padding.
        n: String,
        /// Public exponent, big-endian, base64url without padding.
        e: String,
        /// WebCrypto extractable flag.
        #[serde(default = "default_ext")]
        ext: bool,
        /// Permitted operations; empty means unrestricted.
        #[serde(default)]
        key_ops: Vec<String>,
    },
}

fn default_ext() -> bool {
    true
}

/// Serialize a public key to its JWK text form.
pub fn export_public_key(key: &RsaPublicKey) -> String {
    let jwk = PublicKeyJwk::Rsa {
        alg: KeyAlgorithm::RsaOaep256,
        n: BASE64URL.encode(key.n().to_bytes_be()),
        e: BASE64URL.encode(key.e().to_bytes_be()),
        ext: true,
        key_ops: vec!["encrypt".to_string()],
    };
    serde_json::to_string(&jwk).expect("JWK serialization cannot fail")
}

/// Parse a JWK text blob into a key usable for wrapping.
///
/// # Errors
///
/// [`CryptoError::MalformedKey`] if the blob is not a JWK, names an
/// unsupported `kty`/`alg`, forbids encryption through `key_ops`, has
/// mis-encoded components, or carries a modulus under [`MIN_RSA_BITS`].
pub fn import_public_key(blob: &str) -> Result<RsaPublicKey, CryptoError> {
    let jwk: PublicKeyJwk =
        serde_json::from_str(blob).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

    let PublicKeyJwk::Rsa {
        alg: KeyAlgorithm::RsaOaep256,
        n,
        e,
        key_ops,
        ..
    } = jwk;

    if !key_ops.is_empty() && !key_ops.iter().any(|op| op == "encrypt") {
        return Err(CryptoError::MalformedKey(
            "key_ops does not permit encrypt".to_string(),
        ));
    }

    let n = decode_component("n", &n)?;
    let e = decode_component("e", &e)?;
    let key = RsaPublicKey::new(n, e).map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

    let bits = key.n().bits();
    if bits < MIN_RSA_BITS {
        return Err(CryptoError::MalformedKey(format!(
            "modulus too small: {bits} bits (min {MIN_RSA_BITS})"
        )));
    }
    Ok(key)
}

fn decode_component(name: &str, value: &str) -> Result<BigUint, CryptoError> {
    let bytes = BASE64URL
        .decode(value.trim_end_matches('='))
        .map_err(|e| CryptoError::MalformedKey(format!("invalid {name}: {e}")))?;
    if bytes.is_empty() {
        return Err(CryptoError::MalformedKey(format!("empty {name}")));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}

/// Text form of an envelope as it travels through the relay.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvelopeWire {
    key: String,
    iv: String,
    data: String,
}

/// Decoded encrypted message container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Per-message AES key, wrapped for the recipient.
    pub wrapped_key: Vec<u8>,
    /// AES-GCM nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assemble an envelope from its three binary parts.
    pub fn new(wrapped_key: Vec<u8>, nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self {
            wrapped_key,
            nonce,
            ciphertext,
        }
    }

    /// Encode into the transportable JSON text form.
    pub fn encode(&self) -> String {
        let wire = EnvelopeWire {
            key: BASE64.encode(&self.wrapped_key),
            iv: BASE64.encode(self.nonce),
            data: BASE64.encode(&self.ciphertext),
        };
        serde_json::to_string(&wire).expect("envelope serialization cannot fail")
    }

    /// Decode the JSON text form.
    ///
    /// # Errors
    ///
    /// [`CryptoError::MalformedEnvelope`] if the structure cannot be parsed,
    /// a field is missing or not valid base64, the nonce is not
    /// [`NONCE_SIZE`] bytes, or the ciphertext is shorter than a tag.
    pub fn decode(blob: &str) -> Result<Self, CryptoError> {
        let wire: EnvelopeWire = serde_json::from_str(blob)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

        let wrapped_key = decode_field("key", &wire.key)?;
        if wrapped_key.is_empty() {
            return Err(CryptoError::MalformedEnvelope("empty key".to_string()));
        }

        let nonce_bytes = decode_field("iv", &wire.iv)?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|e| {
            CryptoError::MalformedEnvelope(format!(
                "iv must be {NONCE_SIZE} bytes, got {}: {e}",
                nonce_bytes.len()
            ))
        })?;

        let ciphertext = decode_field("data", &wire.data)?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "data too short: {} bytes",
                ciphertext.len()
            )));
        }

        Ok(Self::new(wrapped_key, nonce, ciphertext))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(value)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid {name}: {e}")))
}
