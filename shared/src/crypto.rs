//! Encryption of exchange API secrets at rest.
//!
//! Ciphertexts are self-describing: `hex(iv) + ":" + hex(ciphertext)`, where the
//! 128-bit IV is drawn fresh for every call. AES-256-GCM authenticates the payload,
//! so a wrong key or a tampered value is always reported instead of decoding to garbage.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use std::fmt;
use thiserror::Error;

type SecretCipher = AesGcm<Aes256, U16>;

pub const KEY_HEX_LEN: usize = 64;
pub const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("CRYPTO_SECRET_KEY must be 64 hex characters: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed, check CRYPTO_SECRET_KEY and data integrity")]
    Decrypt,
    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Clone)]
pub struct SecretCodec {
    cipher: SecretCipher,
}

impl fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCodec").finish_non_exhaustive()
    }
}

impl SecretCodec {
    /// Builds a codec from the 64-character hex key held by the server.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CryptoError> {
        if key_hex.len() != KEY_HEX_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "got {} characters",
                key_hex.len()
            )));
        }
        let key = hex::decode(key_hex)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let cipher = SecretCipher::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Empty input is returned as-is so blank credential fields are never double-encoded.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let iv = SecretCipher::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&iv, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Values that are not shaped like `iv:cipher` are treated as legacy plaintext and
    /// returned unchanged. Once the shape matches, any failure is an error.
    pub fn decrypt(&self, value: &str) -> Result<String, CryptoError> {
        let Some((iv, ciphertext)) = split_envelope(value) else {
            return Ok(value.to_string());
        };
        let ciphertext = hex::decode(ciphertext).map_err(|_| CryptoError::Decrypt)?;
        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    pub fn decrypt_opt(&self, value: Option<&str>) -> Result<Option<String>, CryptoError> {
        value.map(|v| self.decrypt(v)).transpose()
    }
}

/// Returns the decoded IV and the still hex-encoded ciphertext when `value` has the envelope shape.
fn split_envelope(value: &str) -> Option<([u8; IV_LEN], &str)> {
    let mut parts = value.split(':');
    let (iv_hex, ciphertext) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let mut iv = [0u8; IV_LEN];
    hex::decode_to_slice(iv_hex, &mut iv).ok()?;
    Some((iv, ciphertext))
}
