//! At-rest protection of private keys.

pub mod aes;
pub mod unsealed;

pub use aes::{decrypt_key, encrypt_key, PkiSecret};
pub use unsealed::{with_unsealed_key, UnsealedKey};
