//! In-memory encryption for token material.
//!
//! The manager never keeps access token, refresh token, client ID, or client
//! secret in long-lived plaintext fields. Each is sealed with AES-256-GCM
//! under a key generated once at startup; decryption happens locally inside
//! a single call and the plaintext is dropped (and zeroized) immediately
//! after use.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// A ciphertext + nonce pair produced by [`TokenCipher::seal`].
#[derive(Clone)]
pub struct Sealed {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl std::fmt::Debug for Sealed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealed").field("bytes", &self.ciphertext.len()).finish()
    }
}

/// Holds the process-lifetime AES-256-GCM key used to seal token material.
///
/// The key is generated once at startup (`TokenCipher::new`) and zeroized on
/// drop. It is never derived from or persisted alongside the sealed values —
/// losing the process means losing the ability to decrypt, which is fine
/// because the manager reseals from the credential store / identity
/// provider on the next start.
pub struct TokenCipher {
    key: Vec<u8>,
}

impl TokenCipher {
    /// Generate a fresh random key.
    pub fn new() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.to_vec() }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    /// Encrypt a plaintext string under a freshly generated nonce.
    pub fn seal(&self, plaintext: &str) -> Sealed {
        let cipher = self.cipher();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption of in-memory token material cannot fail");
        Sealed {
            nonce: nonce.to_vec(),
            ciphertext,
        }
    }

    /// Decrypt a value previously produced by [`Self::seal`].
    ///
    /// The returned `String` is the caller's responsibility to drop promptly;
    /// it is not zeroized automatically because `String` does not implement
    /// `Zeroize` without an extra wrapper, and the manager's call sites are
    /// all short-lived (single request/response cycle).
    pub fn unseal(&self, sealed: &Sealed) -> Result<String> {
        let cipher = self.cipher();
        let nonce = Nonce::from_slice(&sealed.nonce);
        let plaintext = cipher
            .decrypt(nonce, sealed.ciphertext.as_ref())
            .map_err(|e| Error::Storage(format!("failed to decrypt token material: {e}")))?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::Storage(format!("decrypted token material was not utf-8: {e}")))
    }
}

impl Default for TokenCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokenCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
