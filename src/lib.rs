//! Embedded certificate authority for a private tracking deployment.
//!
//! Issues the TLS server certificate and per-user client certificates that devices and
//! the server use to authenticate each other, keeps private keys encrypted at rest, and
//! publishes a CRL of revoked client certificates.

mod db;
mod helper;
pub mod cert;
pub mod constants;
pub mod crl;
pub mod crypto;
pub mod data;
pub mod pki;
pub mod settings;

pub use crypto::PkiSecret;
pub use data::enums::{EntityKind, KeySize, ValidityDays};
pub use data::error::{PkiError, Result};
pub use data::views::{CaView, ClientCertView, PemDownload, ServerCertView, UserView};
pub use helper::get_secret;
pub use pki::Pki;
pub use settings::Settings;
