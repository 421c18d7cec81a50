//! Hybrid message encryption: AES-256-GCM payloads with RSA-OAEP key wrap.
//!
//! Every call to [`encrypt`] draws a fresh 256-bit AES key and a fresh
//! 96-bit nonce, seals the plaintext with AES-GCM, then wraps the raw AES
//! key for the recipient with RSA-OAEP (SHA-256, MGF1-SHA-256). The AES key
//! is zeroed on drop and never leaves the call.
//!
//! This matches WebCrypto's `RSA-OAEP` + `AES-GCM` so browser and native
//! clients can read each other's envelopes.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::envelope::{self, Envelope, MIN_RSA_BITS, NONCE_SIZE};
use crate::error::CryptoError;

/// Modulus size for freshly generated key pairs.
pub const RSA_BITS: usize = 2048;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// A client's RSA key pair. The private half never leaves this struct.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh [`RSA_BITS`]-bit key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(RSA_BITS)
    }

    /// Generate a key pair with an explicit modulus size.
    ///
    /// Sizes below [`MIN_RSA_BITS`] are refused.
    pub fn generate_with_bits(bits: usize) -> Result<Self, CryptoError> {
        if bits < MIN_RSA_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "{bits}-bit modulus is below the {MIN_RSA_BITS}-bit minimum"
            )));
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    /// Public half of this pair.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Public half exported as a JWK string.
    pub fn export_public_key(&self) -> String {
        envelope::export_public_key(&self.public)
    }

    /// Open an envelope addressed to this key pair.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::UnwrapFailure`] if the wrapped key was not made for
    ///   this pair or is corrupt.
    /// - [`CryptoError::AuthenticationFailure`] if the GCM tag does not verify.
    ///   No plaintext is returned in that case.
    /// - [`CryptoError::DecodingFailure`] if the plaintext is not UTF-8.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<String, CryptoError> {
        let key = Zeroizing::new(
            self.private
                .decrypt(Oaep::new::<Sha256>(), &envelope.wrapped_key)
                .map_err(|e| {
                    log::debug!("[Crypto] OAEP unwrap failed: {e}");
                    CryptoError::UnwrapFailure
                })?,
        );
        if key.len() != KEY_SIZE {
            return Err(CryptoError::UnwrapFailure);
        }

        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| {
            log::debug!("[Crypto] Unwrapped key rejected: {e}");
            CryptoError::UnwrapFailure
        })?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
            .map_err(|e| {
                log::debug!("[Crypto] GCM open failed: {e}");
                CryptoError::AuthenticationFailure
            })?;

        String::from_utf8(plaintext).map_err(|e| {
            log::debug!("[Crypto] Plaintext is not UTF-8: {e}");
            CryptoError::DecodingFailure
        })
    }

    /// Decode an envelope blob and open it.
    pub fn decrypt_blob(&self, blob: &str) -> Result<String, CryptoError> {
        self.decrypt(&Envelope::decode(blob)?)
    }
}

/// Encrypt a text message for the holder of `recipient`'s private key.
pub fn encrypt(plaintext: &str, recipient: &RsaPublicKey) -> Result<Envelope, CryptoError> {
    seal(plaintext.as_bytes(), recipient)
}

fn seal(plaintext: &[u8], recipient: &RsaPublicKey) -> Result<Envelope, CryptoError> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rng().fill_bytes(&mut key[..]);

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| CryptoError::WrapFailure(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::WrapFailure(format!("AES-GCM: {e}")))?;

    let wrapped_key = recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key[..])
        .map_err(|e| CryptoError::WrapFailure(format!("RSA-OAEP: {e}")))?;

    Ok(Envelope::new(wrapped_key, nonce, ciphertext))
}
