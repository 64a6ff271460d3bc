// src/utils/crypto.rs

//! Field-level encryption for question and choice text at rest.
//!
//! Each value is sealed with AES-256-GCM-SIV under a process-wide key derived
//! from `ENCRYPTION_KEY` (SHA-256 of the secret). A fresh 96-bit nonce is
//! drawn per call and stored in front of the ciphertext, so the column value
//! is `base64(nonce || ciphertext || tag)`. Equal plaintexts therefore never
//! share a ciphertext.

use aes_gcm_siv::{
    Aes256GcmSiv, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Byte length of an AES-GCM-SIV nonce.
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag appended by the AEAD.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("cipher key could not be initialised")]
    InvalidKey,

    #[error("encryption failed")]
    Encryption,

    #[error("ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("ciphertext is shorter than nonce and tag")]
    Truncated,

    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("decrypted bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Symmetric codec shared by every request; cheap to clone behind an `Arc`.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256GcmSiv,
}

impl FieldCipher {
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256GcmSiv::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Encrypts UTF-8 text. Empty or absent input yields `None` without
    /// touching the cipher.
    pub fn encrypt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        let Some(plaintext) = plaintext.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut buf = Vec::with_capacity(NONCE_LEN + sealed.len());
        buf.extend_from_slice(&nonce_bytes);
        buf.extend_from_slice(&sealed);

        Ok(Some(STANDARD.encode(buf)))
    }

    /// Reverses [`FieldCipher::encrypt`]. Empty or absent input yields `None`.
    pub fn decrypt(&self, ciphertext: Option<&str>) -> Result<Option<String>, CryptoError> {
        let Some(ciphertext) = ciphertext.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        let buf = STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::InvalidEncoding)?;
        if buf.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated);
        }

        let (nonce, sealed) = buf.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| CryptoError::InvalidUtf8)
    }
}
