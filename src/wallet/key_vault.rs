use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::SigningKey;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

const DOMAIN_TAG: &[u8] = b"badger:sub-wallet-key-vault:v1";
const NONCE_SIZE: usize = 12;
const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("master secret must be at least {MIN_SECRET_LEN} characters")]
    SecretTooShort,
    #[error("ciphertext blob is malformed or truncated")]
    MalformedBlob,
    #[error("decryption failed: authentication tag mismatch")]
    AuthenticationFailed,
}

/// Authenticated encryption of sub-wallet signing keys. The master secret
/// is checked once at construction; its absence or brevity is a fatal
/// configuration error, never silently tolerated.
pub struct KeyVault {
    cipher: Aes256Gcm,
}

impl KeyVault {
    pub fn new(master_secret: &str) -> Result<Self, KeyVaultError> {
        if master_secret.len() < MIN_SECRET_LEN {
            return Err(KeyVaultError::SecretTooShort);
        }
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(master_secret.as_bytes());
        let derived = hasher.finalize();
        let key = Key::<Aes256Gcm>::from_slice(&derived);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    #[instrument(skip(self, plaintext_key))]
    pub fn encrypt(&self, plaintext_key: &[u8]) -> Result<String, KeyVaultError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext_and_tag = self
            .cipher
            .encrypt(nonce, plaintext_key)
            .map_err(|_| KeyVaultError::AuthenticationFailed)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext_and_tag.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext_and_tag);
        Ok(STANDARD.encode(blob))
    }

    #[instrument(skip(self, blob))]
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>, KeyVaultError> {
        let raw = STANDARD.decode(blob).map_err(|_| KeyVaultError::MalformedBlob)?;
        if raw.len() <= NONCE_SIZE {
            return Err(KeyVaultError::MalformedBlob);
        }
        let (nonce_bytes, ciphertext_and_tag) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext_and_tag)
            .map_err(|_| KeyVaultError::AuthenticationFailed)
    }

    /// Generates a fresh ed25519 signing keypair whose seed never touches
    /// disk unencrypted.
    pub fn generate_keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_recovers_plaintext() {
        let vault = KeyVault::new("a-sufficiently-long-secret").unwrap();
        let key_bytes = KeyVault::generate_keypair().to_bytes();
        let blob = vault.encrypt(&key_bytes).unwrap();
        let recovered = vault.decrypt(&blob).unwrap();
        assert_eq!(recovered, key_bytes.to_vec());
    }

    #[test]
    fn tampered_blob_fails_authentication() {
        let vault = KeyVault::new("a-sufficiently-long-secret").unwrap();
        let key_bytes = KeyVault::generate_keypair().to_bytes();
        let blob = vault.encrypt(&key_bytes).unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw);
        assert!(matches!(vault.decrypt(&tampered), Err(KeyVaultError::AuthenticationFailed)));
    }

    #[test]
    fn short_secret_is_rejected_at_construction() {
        assert!(matches!(KeyVault::new("short"), Err(KeyVaultError::SecretTooShort)));
    }
}
