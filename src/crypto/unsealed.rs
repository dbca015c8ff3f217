use openssl::pkey::{PKey, Private};
use zeroize::{Zeroize, Zeroizing};
use crate::crypto::aes::{decrypt_key, PkiSecret};
use crate::data::error::{PkiError, Result};

/// A private key decrypted for the duration of one signing operation.
///
/// Only [`with_unsealed_key`] hands these out, and only by reference, so the key cannot
/// outlive the closure it was opened for.
pub struct UnsealedKey {
    pem: Zeroizing<String>,
    pkey: PKey<Private>,
}

impl UnsealedKey {
    fn open(sealed: &[u8], secret: &PkiSecret) -> Result<Self> {
        let plaintext = decrypt_key(sealed, secret)?;
        let pem = match String::from_utf8(plaintext.to_vec()) {
            Ok(pem) => Zeroizing::new(pem),
            Err(e) => {
                e.into_bytes().zeroize();
                return Err(PkiError::DecryptionFailure);
            }
        };
        let pkey = PKey::private_key_from_pem(pem.as_bytes()).map_err(|_| PkiError::DecryptionFailure)?;
        Ok(Self { pem, pkey })
    }

    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    pub fn pem(&self) -> &str {
        self.pem.as_str()
    }
}

/// Decrypt `sealed`, run `operation` with the key, and wipe the plaintext whatever the
/// outcome.
pub fn with_unsealed_key<T>(
    sealed: &[u8],
    secret: &PkiSecret,
    operation: impl FnOnce(&UnsealedKey) -> Result<T>,
) -> Result<T> {
    let key = UnsealedKey::open(sealed, secret)?;
    let result = operation(&key);
    drop(key);
    result
}
