use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use sha2::{Digest, Sha256};
use tracing::warn;
use zeroize::Zeroizing;
use crate::data::error::{PkiError, Result};

const NONCE_SIZE: usize = 12; // 96 bits for GCM
const TAG_SIZE: usize = 16; // 128 bits for GCM

/// Process-wide secret that private keys are sealed with.
///
/// Only the SHA-256 digest of the configured secret is kept; it is the AES-256 key.
pub struct PkiSecret {
    key: Zeroizing<[u8; 32]>,
}

impl PkiSecret {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(PkiError::invalid("secret must not be empty"));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        Ok(Self { key })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }
}

impl std::fmt::Debug for PkiSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkiSecret(..)")
    }
}

/// Seal a PEM-encoded private key for storage at rest.
///
/// # Format
/// The output is: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
pub fn encrypt_key(pem: &[u8], secret: &PkiSecret) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = secret
        .cipher()
        .encrypt(&nonce, pem)
        .map_err(|e| PkiError::Internal(format!("private key encryption failed: {e}")))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a key sealed by [`encrypt_key`].
///
/// Truncated, tampered or wrong-secret input fails with `DecryptionFailure`; the
/// plaintext buffer is wiped when dropped.
pub fn decrypt_key(sealed: &[u8], secret: &PkiSecret) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        warn!("Sealed key is {} bytes, shorter than nonce and tag", sealed.len());
        return Err(PkiError::DecryptionFailure);
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    secret
        .cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| PkiError::DecryptionFailure)
}
