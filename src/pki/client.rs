use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::cert::{self, LeafProfile, SubjectName};
use crate::crl;
use crate::crypto::{with_unsealed_key, PkiSecret};
use crate::data::enums::{KeySize, ValidityDays};
use crate::data::error::{PkiError, Result};
use crate::data::objects::{ClientCertificate, User};
use crate::data::views::PemDownload;
use crate::db::PkiDB;
use crate::helper::require_name;
use crate::pki::{issue_leaf, run_blocking};

/// Issues per-user client certificates, tracks their revocation and signs the CRL.
#[derive(Clone, Debug)]
pub struct ClientCertIssuer {
    db: PkiDB,
    secret: Arc<PkiSecret>,
}

impl ClientCertIssuer {
    pub(crate) fn new(db: PkiDB, secret: Arc<PkiSecret>) -> Self {
        Self { db, secret }
    }

    pub async fn register_user(&self, username: &str) -> Result<User> {
        let username = require_name(username)?;
        let user = self.db.insert_user(username).await?;
        info!("Registered user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        self.db.get_user(id).await
    }

    /// Issue a client certificate for `user_id`; their previous active certificate is
    /// deactivated but stays unrevoked.
    ///
    /// The subject is CN = username and O = the issuing CA's organization.
    pub async fn issue(&self, user_id: i64, validity_days: i64, key_size: u32) -> Result<ClientCertificate> {
        let key_size = KeySize::from_bits(key_size)?;
        let validity = ValidityDays::try_from(validity_days)?;

        let user = self.db.get_user(user_id).await?;
        let ca = self.db.get_active_ca().await?.ok_or(PkiError::NoActiveCa)?;
        let ca_id = ca.id;

        let secret = self.secret.clone();
        let material = run_blocking(move || {
            let issuer = cert::parse_certificate_pem(&ca.certificate_pem)?;
            let subject = SubjectName::new(&user.username, cert::organization(&issuer).as_deref())?;
            let profile = LeafProfile::Client;
            issue_leaf(&issuer, &ca.encrypted_private_key, &secret, &subject, validity, key_size, &profile)
        })
        .await?;

        let cert = self.db.insert_active_client_cert(material, user_id, ca_id).await?;
        info!("Issued client certificate {} (serial {}) for user {user_id}", cert.id, cert.serial_number);
        Ok(cert)
    }

    pub async fn get(&self, id: i64) -> Result<ClientCertificate> {
        self.db.get_client_cert(id).await
    }

    pub async fn get_active_for_user(&self, user_id: i64) -> Result<Option<ClientCertificate>> {
        self.db.get_active_client_cert(user_id).await
    }

    pub async fn list(&self, user_id: Option<i64>) -> Result<Vec<ClientCertificate>> {
        self.db.list_client_certs(user_id).await
    }

    pub async fn revoke(&self, id: i64) -> Result<ClientCertificate> {
        let cert = self.db.revoke_client_cert(id).await.inspect_err(|e| {
            if matches!(e, PkiError::InvalidState(_)) {
                warn!("Refused to revoke client certificate {id}: {e}");
            }
        })?;
        info!("Revoked client certificate {id} (serial {})", cert.serial_number);
        Ok(cert)
    }

    /// Permanently delete a client certificate that is revoked or inactive.
    pub async fn expunge(&self, id: i64) -> Result<()> {
        self.db.delete_client_cert(id).await.inspect_err(|e| {
            if matches!(e, PkiError::InvalidState(_)) {
                warn!("Refused to expunge client certificate {id}: {e}");
            }
        })?;
        info!("Expunged client certificate {id}");
        Ok(())
    }

    /// PEM CRL of everything the active CA has revoked, signed by that CA.
    pub async fn build_crl(&self, validity_days: i64) -> Result<PemDownload> {
        let validity = ValidityDays::try_from(validity_days)?;
        let ca = self.db.get_active_ca().await?.ok_or(PkiError::NoActiveCa)?;
        let ca_id = ca.id;
        let revoked = self.db.revoked_entries(ca_id).await?;
        debug!("Building CRL for certificate authority {ca_id} with {} entries", revoked.len());

        let secret = self.secret.clone();
        let pem = run_blocking(move || {
            let issuer = cert::parse_certificate_pem(&ca.certificate_pem)?;
            let crl = with_unsealed_key(&ca.encrypted_private_key, &secret, |key| {
                crl::build_crl(&issuer, key.pem(), &revoked, validity)
            })?;
            crl::crl_pem(&crl)
        })
        .await?;

        info!("Built CRL for certificate authority {ca_id}");
        Ok(PemDownload::new(format!("ca-{ca_id}-crl.pem"), pem))
    }
}
