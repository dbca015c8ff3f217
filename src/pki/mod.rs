//! Operations the rest of the deployment calls into.

pub mod authority;
pub mod client;
pub mod server;

use std::sync::Arc;
use openssl::x509::X509Ref;
use tracing::{debug, info};
use crate::cert::{self, LeafProfile, SubjectName};
use crate::constants::{PKI_VERSION, SECRET_KEY_NAME};
use crate::crypto::{decrypt_key, with_unsealed_key, PkiSecret};
use crate::data::enums::{EntityKind, KeySize, ValidityDays};
use crate::data::error::{PkiError, Result};
use crate::data::objects::CertificateMaterial;
use crate::data::views::{CaView, ClientCertView, PemDownload, ServerCertView, UserView};
use crate::db::PkiDB;
use crate::helper::get_secret;
use crate::settings::Settings;

pub use authority::CaManager;
pub use client::ClientCertIssuer;
pub use server::ServerCertIssuer;

/// Run CPU-bound certificate work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(operation).await?
}

/// Sign a leaf with `issuer`, unsealing its key for the signature only, and seal the new key.
pub(crate) fn issue_leaf(
    issuer: &X509Ref,
    sealed_issuer_key: &[u8],
    secret: &PkiSecret,
    subject: &SubjectName,
    validity: ValidityDays,
    key_size: KeySize,
    profile: &LeafProfile,
) -> Result<CertificateMaterial> {
    let issued = with_unsealed_key(sealed_issuer_key, secret, |key| {
        cert::sign_leaf_certificate(issuer, key.pkey(), subject, validity, key_size, profile)
    })?;
    CertificateMaterial::seal(&issued, key_size, secret)
}

/// The embedded certificate authority.
///
/// Cheap to clone; clones share the connection pool and the secret.
#[derive(Clone, Debug)]
pub struct Pki {
    db: PkiDB,
    secret: Arc<PkiSecret>,
    settings: Arc<Settings>,
    authorities: CaManager,
    servers: ServerCertIssuer,
    clients: ClientCertIssuer,
}

impl Pki {
    pub fn new(settings: Settings, secret: PkiSecret) -> Result<Self> {
        let db = PkiDB::new(&settings)?;
        let secret = Arc::new(secret);
        let settings = Arc::new(settings);

        Ok(Self {
            authorities: CaManager::new(db.clone(), secret.clone(), settings.clone()),
            servers: ServerCertIssuer::new(db.clone(), secret.clone(), settings.clone()),
            clients: ClientCertIssuer::new(db.clone(), secret.clone()),
            db,
            secret,
            settings,
        })
    }

    /// Load settings from file and the secret from `MYTRACKS_SECRET_KEY`.
    pub async fn from_env() -> Result<Self> {
        info!("Starting embedded PKI {PKI_VERSION}");
        let settings = Settings::load_from_file(None).await?;
        let secret = PkiSecret::new(&get_secret(SECRET_KEY_NAME)?)?;
        match &settings.database_path {
            Some(path) => debug!("Using database at {}", path.display()),
            None => debug!("Using in-memory database"),
        }
        Self::new(settings, secret)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn authorities(&self) -> &CaManager {
        &self.authorities
    }

    pub fn servers(&self) -> &ServerCertIssuer {
        &self.servers
    }

    pub fn clients(&self) -> &ClientCertIssuer {
        &self.clients
    }

    // ----- certificate authorities -----

    pub async fn create_ca(&self, common_name: &str, validity_days: i64, key_size: u32) -> Result<CaView> {
        Ok(self.authorities.create(common_name, validity_days, key_size).await?.into())
    }

    pub async fn get_active_ca(&self) -> Result<CaView> {
        self.authorities
            .get_active()
            .await?
            .map(CaView::from)
            .ok_or_else(|| PkiError::NotFound("no active certificate authority".into()))
    }

    pub async fn get_ca(&self, id: i64) -> Result<CaView> {
        Ok(self.authorities.get(id).await?.into())
    }

    pub async fn list_cas(&self) -> Result<Vec<CaView>> {
        Ok(self.authorities.list().await?.into_iter().map(CaView::from).collect())
    }

    pub async fn deactivate_ca(&self, id: i64) -> Result<CaView> {
        Ok(self.authorities.deactivate(id).await?.into())
    }

    pub async fn expunge_ca(&self, id: i64) -> Result<()> {
        self.authorities.expunge(id).await
    }

    // ----- server certificates -----

    pub async fn issue_server_cert(
        &self,
        common_name: &str,
        san_entries: &[String],
        validity_days: i64,
        key_size: u32,
    ) -> Result<ServerCertView> {
        Ok(self.servers.issue(common_name, san_entries, validity_days, key_size).await?.into())
    }

    pub async fn get_active_server_cert(&self) -> Result<ServerCertView> {
        self.servers
            .get_active()
            .await?
            .map(ServerCertView::from)
            .ok_or_else(|| PkiError::NotFound("no active server certificate".into()))
    }

    pub async fn get_server_cert(&self, id: i64) -> Result<ServerCertView> {
        Ok(self.servers.get(id).await?.into())
    }

    pub async fn list_server_certs(&self) -> Result<Vec<ServerCertView>> {
        Ok(self.servers.list().await?.into_iter().map(ServerCertView::from).collect())
    }

    pub async fn deactivate_server_cert(&self, id: i64) -> Result<ServerCertView> {
        Ok(self.servers.deactivate(id).await?.into())
    }

    pub async fn expunge_server_cert(&self, id: i64) -> Result<()> {
        self.servers.expunge(id).await
    }

    // ----- users and client certificates -----

    pub async fn register_user(&self, username: &str) -> Result<UserView> {
        Ok(self.clients.register_user(username).await?.into())
    }

    pub async fn issue_client_cert(&self, user_id: i64, validity_days: i64, key_size: u32) -> Result<ClientCertView> {
        Ok(self.clients.issue(user_id, validity_days, key_size).await?.into())
    }

    pub async fn get_client_cert(&self, id: i64) -> Result<ClientCertView> {
        Ok(self.clients.get(id).await?.into())
    }

    pub async fn get_active_client_cert(&self, user_id: i64) -> Result<Option<ClientCertView>> {
        Ok(self.clients.get_active_for_user(user_id).await?.map(ClientCertView::from))
    }

    /// Client certificates, newest first, optionally only those of one user.
    pub async fn list_client_certs(&self, user_id: Option<i64>) -> Result<Vec<ClientCertView>> {
        Ok(self.clients.list(user_id).await?.into_iter().map(ClientCertView::from).collect())
    }

    pub async fn revoke_client_cert(&self, id: i64) -> Result<ClientCertView> {
        Ok(self.clients.revoke(id).await?.into())
    }

    pub async fn expunge_client_cert(&self, id: i64) -> Result<()> {
        self.clients.expunge(id).await
    }

    pub async fn build_crl(&self, validity_days: i64) -> Result<PemDownload> {
        self.clients.build_crl(validity_days).await
    }

    // ----- downloads -----

    pub async fn download_cert_pem(&self, kind: EntityKind, id: i64) -> Result<PemDownload> {
        let pem = self.db.get_certificate_pem(kind, id).await?;
        Ok(PemDownload::new(format!("{}-{id}.pem", kind.file_stem()), pem.into_bytes()))
    }

    /// Decrypted private key of a certificate. Access control is the caller's job.
    pub async fn download_private_key_pem(&self, kind: EntityKind, id: i64) -> Result<PemDownload> {
        let sealed = self.db.get_sealed_private_key(kind, id).await?;
        let pem = decrypt_key(&sealed, &self.secret)?;
        info!("Private key of {} {id} released for download", kind.label());
        Ok(PemDownload::sensitive(format!("{}-{id}-key.pem", kind.file_stem()), pem))
    }
}
