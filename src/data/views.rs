use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;
use crate::constants::PEM_CONTENT_TYPE;
use crate::data::enums::KeySize;
use crate::data::objects::{CertificateAuthority, ClientCertificate, ServerCertificate, User};

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CaView {
    pub id: i64,
    pub common_name: String,
    pub fingerprint: String,
    pub key_size: KeySize,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub certificate_pem: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerCertView {
    pub id: i64,
    pub issuing_ca_id: i64,
    pub common_name: String,
    pub fingerprint: String,
    pub key_size: KeySize,
    pub san_entries: Vec<String>,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub certificate_pem: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ClientCertView {
    pub id: i64,
    pub user_id: i64,
    pub issuing_ca_id: i64,
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
    pub certificate_pem: String,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A PEM file ready to hand to an HTTP client.
pub struct PemDownload {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: Zeroizing<Vec<u8>>,
}

impl PemDownload {
    pub(crate) fn new(file_name: String, body: Vec<u8>) -> Self {
        Self::sensitive(file_name, Zeroizing::new(body))
    }

    pub(crate) fn sensitive(file_name: String, body: Zeroizing<Vec<u8>>) -> Self {
        Self {
            file_name,
            content_type: PEM_CONTENT_TYPE,
            body,
        }
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}

impl std::fmt::Debug for PemDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PemDownload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("body", &format_args!("{} bytes", self.body.len()))
            .finish()
    }
}

impl From<CertificateAuthority> for CaView {
    fn from(ca: CertificateAuthority) -> Self {
        CaView {
            id: ca.id,
            common_name: ca.common_name,
            fingerprint: ca.fingerprint,
            key_size: ca.key_size,
            not_valid_before: ca.not_valid_before,
            not_valid_after: ca.not_valid_after,
            is_active: ca.is_active,
            created_at: ca.created_at,
            certificate_pem: ca.certificate_pem,
        }
    }
}

impl From<ServerCertificate> for ServerCertView {
    fn from(cert: ServerCertificate) -> Self {
        ServerCertView {
            id: cert.id,
            issuing_ca_id: cert.issuing_ca_id,
            common_name: cert.common_name,
            fingerprint: cert.fingerprint,
            key_size: cert.key_size,
            san_entries: cert.san_entries,
            not_valid_before: cert.not_valid_before,
            not_valid_after: cert.not_valid_after,
            is_active: cert.is_active,
            created_at: cert.created_at,
            certificate_pem: cert.certificate_pem,
        }
    }
}

impl From<ClientCertificate> for ClientCertView {
    fn from(cert: ClientCertificate) -> Self {
        ClientCertView {
            id: cert.id,
            user_id: cert.user_id,
            issuing_ca_id: cert.issuing_ca_id,
            common_name: cert.common_name,
            fingerprint: cert.fingerprint,
            key_size: cert.key_size,
            serial_number: cert.serial_number,
            not_valid_before: cert.not_valid_before,
            not_valid_after: cert.not_valid_after,
            is_active: cert.is_active,
            revoked: cert.revoked,
            revoked_at: cert.revoked_at,
            created_at: cert.created_at,
            certificate_pem: cert.certificate_pem,
        }
    }
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        UserView {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        }
    }
}
