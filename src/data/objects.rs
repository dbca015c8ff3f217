use chrono::{DateTime, Utc};
use crate::cert::{self, IssuedCertificate};
use crate::crypto::{encrypt_key, PkiSecret};
use crate::data::enums::{EntityKind, KeySize};
use crate::data::error::{PkiError, Result};

#[derive(Clone, Debug)]
pub struct CertificateAuthority {
    pub id: i64,
    pub certificate_pem: String,
    pub encrypted_private_key: Vec<u8>,
    pub common_name: String,
    pub fingerprint: String,
    pub key_size: KeySize,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ServerCertificate {
    pub id: i64,
    pub issuing_ca_id: i64,
    pub certificate_pem: String,
    pub encrypted_private_key: Vec<u8>,
    pub common_name: String,
    pub fingerprint: String,
    pub key_size: KeySize,
    pub san_entries: Vec<String>,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ClientCertificate {
    pub id: i64,
    pub user_id: i64,
    pub issuing_ca_id: i64,
    pub certificate_pem: String,
    pub encrypted_private_key: Vec<u8>,
    pub common_name: String,
    pub fingerprint: String,
    pub key_size: KeySize,
    pub serial_number: String,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub is_active: bool,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Account a client certificate belongs to.
#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Everything stored about a freshly issued certificate, with its key already sealed.
#[derive(Clone, Debug)]
pub(crate) struct CertificateMaterial {
    pub(crate) certificate_pem: String,
    pub(crate) encrypted_private_key: Vec<u8>,
    pub(crate) common_name: String,
    pub(crate) fingerprint: String,
    pub(crate) key_size: KeySize,
    pub(crate) serial_number: String,
    pub(crate) san_entries: Vec<String>,
    pub(crate) not_valid_before: DateTime<Utc>,
    pub(crate) not_valid_after: DateTime<Utc>,
}

impl CertificateMaterial {
    pub(crate) fn seal(issued: &IssuedCertificate, key_size: KeySize, secret: &PkiSecret) -> Result<Self> {
        let certificate = &issued.certificate;
        let private_key_pem = issued.private_key_pem()?;

        Ok(Self {
            certificate_pem: issued.certificate_pem()?,
            encrypted_private_key: encrypt_key(&private_key_pem, secret)?,
            common_name: cert::subject_common_name(certificate).unwrap_or_default(),
            fingerprint: cert::fingerprint(certificate)?,
            key_size,
            serial_number: cert::serial_number_hex(certificate)?,
            san_entries: cert::subject_alt_names(certificate),
            not_valid_before: cert::not_before(certificate)?,
            not_valid_after: cert::expiry(certificate)?,
        })
    }
}

/// Where a certificate record sits in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Inactive,
    Revoked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Deactivate,
    Revoke,
    Expunge,
}

impl LifecycleState {
    pub fn of(is_active: bool, revoked: bool) -> Self {
        match (is_active, revoked) {
            (_, true) => LifecycleState::Revoked,
            (true, false) => LifecycleState::Active,
            (false, false) => LifecycleState::Inactive,
        }
    }

    /// Whether `transition` may be applied to a record of `kind` in this state.
    ///
    /// Only client certificates can be revoked; nothing active can be expunged.
    pub fn check(self, kind: EntityKind, transition: Transition, id: i64) -> Result<()> {
        use LifecycleState::*;
        use Transition::*;

        let label = kind.label();
        match (kind, transition, self) {
            (_, Deactivate, Active) => Ok(()),
            (_, Deactivate, _) => Err(PkiError::conflict(format!("{label} {id} is already inactive"))),
            (EntityKind::Client, Revoke, Revoked) => Err(PkiError::conflict(format!("{label} {id} is already revoked"))),
            (EntityKind::Client, Revoke, _) => Ok(()),
            (_, Revoke, _) => Err(PkiError::conflict(format!("a {label} cannot be revoked"))),
            (EntityKind::Client, Expunge, Active) => {
                Err(PkiError::conflict(format!("{label} {id} is active - revoke it first")))
            }
            (_, Expunge, Active) => Err(PkiError::conflict(format!("{label} {id} is active - deactivate it first"))),
            (_, Expunge, _) => Ok(()),
        }
    }
}

impl CertificateAuthority {
    pub fn state(&self) -> LifecycleState {
        LifecycleState::of(self.is_active, false)
    }
}

impl ServerCertificate {
    pub fn state(&self) -> LifecycleState {
        LifecycleState::of(self.is_active, false)
    }
}

impl ClientCertificate {
    pub fn state(&self) -> LifecycleState {
        LifecycleState::of(self.is_active, self.revoked)
    }
}
