//! # tributo-vault — Credential Vault
//!
//! Authenticated symmetric encryption for portal passwords at rest.
//!
//! ## Key Derivation
//!
//! The vault key is either supplied directly (`MASTER_KEY`, 32 bytes,
//! URL-safe base64) or derived by one-shot SHA-256 over the process-wide
//! `MASTER_SECRET`. Derivation is deterministic: the same secret always
//! yields the same key, so ciphertexts survive process restarts.
//!
//! ## Ciphertext Format
//!
//! AES-256-GCM with a random 96-bit nonce. Storage form is URL-safe
//! base64 over `nonce ‖ ciphertext`. A ciphertext that fails to decrypt —
//! wrong key, truncation, tampering — surfaces [`VaultError::DecryptionFailed`],
//! which is fatal to the job owning those credentials.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-GCM nonce prefix, in bytes.
const NONCE_LEN: usize = 12;

/// Environment variable carrying an explicit 256-bit key (URL-safe base64).
pub const MASTER_KEY_VAR: &str = "MASTER_KEY";

/// Environment variable carrying the process-wide secret the key is
/// derived from when no explicit key is configured.
pub const MASTER_SECRET_VAR: &str = "MASTER_SECRET";

/// Vault errors.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Neither `MASTER_KEY` nor `MASTER_SECRET` is configured.
    #[error("no vault key material: set {MASTER_SECRET_VAR} (or {MASTER_KEY_VAR})")]
    MissingSecret,

    /// `MASTER_KEY` was set but is not 32 bytes of URL-safe base64.
    #[error("{MASTER_KEY_VAR} must be 32 bytes of URL-safe base64")]
    MalformedKey,

    /// The plaintext to encrypt is empty.
    #[error("password cannot be empty")]
    EmptyPlaintext,

    /// The AEAD rejected the encryption input.
    #[error("credential encryption failed")]
    EncryptionFailed,

    /// The stored ciphertext could not be authenticated and decrypted.
    /// Fatal at the caller: the owning job must not proceed.
    #[error("stored credential ciphertext failed to decrypt")]
    DecryptionFailed,
}

/// A decrypted secret that wipes itself when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Expose the plaintext. Callers must not persist it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// The credential vault. Cheap to clone; holds only the derived key.
#[derive(Clone)]
pub struct Vault {
    key: [u8; 32],
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"[REDACTED]").finish()
    }
}

impl Vault {
    /// Build a vault from an explicit 256-bit key.
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the vault key from a process-wide secret by one-shot hashing.
    pub fn from_master_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Resolve key material from the environment: `MASTER_KEY` wins when
    /// present, otherwise the key is derived from `MASTER_SECRET`.
    pub fn from_env() -> Result<Self, VaultError> {
        if let Ok(encoded) = std::env::var(MASTER_KEY_VAR) {
            let decoded = URL_SAFE
                .decode(encoded.trim())
                .map_err(|_| VaultError::MalformedKey)?;
            let key: [u8; 32] = decoded.try_into().map_err(|_| VaultError::MalformedKey)?;
            return Ok(Self::from_key(key));
        }
        match std::env::var(MASTER_SECRET_VAR) {
            Ok(secret) if !secret.is_empty() => Ok(Self::from_master_secret(&secret)),
            _ => Err(VaultError::MissingSecret),
        }
    }

    /// Encrypt a password for storage. Returns URL-safe base64 over
    /// `nonce ‖ ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        if plaintext.is_empty() {
            return Err(VaultError::EmptyPlaintext);
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(combined))
    }

    /// Decrypt a stored ciphertext back to the plaintext password.
    pub fn decrypt(&self, stored: &str) -> Result<Secret, VaultError> {
        let combined = URL_SAFE
            .decode(stored.trim())
            .map_err(|_| VaultError::DecryptionFailed)?;
        if combined.len() <= NONCE_LEN {
            return Err(VaultError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)?;

        let secret = String::from_utf8(plaintext.clone()).map_err(|_| {
            plaintext.zeroize();
            VaultError::DecryptionFailed
        })?;
        plaintext.zeroize();
        Ok(Secret::new(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let vault = Vault::from_master_secret("test-secret");
        let stored = vault.encrypt("SiiP@ssw0rd").unwrap();
        let recovered = vault.decrypt(&stored).unwrap();
        assert_eq!(recovered.expose(), "SiiP@ssw0rd");
    }

    #[test]
    fn ciphertexts_differ_per_encryption() {
        // Random nonce: the same plaintext never encrypts twice to the
        // same ciphertext.
        let vault = Vault::from_master_secret("test-secret");
        let a = vault.encrypt("password").unwrap();
        let b = vault.encrypt("password").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap().expose(), "password");
        assert_eq!(vault.decrypt(&b).unwrap().expose(), "password");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = Vault::from_master_secret("same-secret");
        let b = Vault::from_master_secret("same-secret");
        let stored = a.encrypt("hunter2").unwrap();
        assert_eq!(b.decrypt(&stored).unwrap().expose(), "hunter2");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = Vault::from_master_secret("secret-a");
        let b = Vault::from_master_secret("secret-b");
        let stored = a.encrypt("hunter2").unwrap();
        assert!(matches!(
            b.decrypt(&stored),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let vault = Vault::from_master_secret("secret");
        let stored = vault.encrypt("hunter2").unwrap();
        let mut bytes = URL_SAFE.decode(&stored).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE.encode(bytes);
        assert!(matches!(
            vault.decrypt(&tampered),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn garbage_input_fails() {
        let vault = Vault::from_master_secret("secret");
        assert!(vault.decrypt("not base64 at all!!").is_err());
        assert!(vault.decrypt("").is_err());
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let vault = Vault::from_master_secret("secret");
        assert!(matches!(
            vault.encrypt(""),
            Err(VaultError::EmptyPlaintext)
        ));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("visible".into());
        assert!(!format!("{secret:?}").contains("visible"));
    }
}
