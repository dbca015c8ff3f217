use std::sync::Arc;
use tracing::{info, warn};
use crate::cert::{self, LeafProfile, SubjectName};
use crate::crypto::PkiSecret;
use crate::data::enums::{KeySize, ValidityDays};
use crate::data::error::{PkiError, Result};
use crate::data::objects::ServerCertificate;
use crate::db::PkiDB;
use crate::pki::{issue_leaf, run_blocking};
use crate::settings::Settings;

/// Issues TLS server certificates and owns the single active one.
#[derive(Clone, Debug)]
pub struct ServerCertIssuer {
    db: PkiDB,
    secret: Arc<PkiSecret>,
    settings: Arc<Settings>,
}

impl ServerCertIssuer {
    pub(crate) fn new(db: PkiDB, secret: Arc<PkiSecret>, settings: Arc<Settings>) -> Self {
        Self { db, secret, settings }
    }

    /// Issue a server certificate from the active CA and make it the active one.
    ///
    /// `san_entries` keep their order; entries parsing as IPv4/IPv6 become IP SANs.
    pub async fn issue(
        &self,
        common_name: &str,
        san_entries: &[String],
        validity_days: i64,
        key_size: u32,
    ) -> Result<ServerCertificate> {
        let subject = SubjectName::new(common_name, Some(&self.settings.organization))?;
        let san_entries = cert::parse_san_entries(san_entries)?;
        let key_size = KeySize::from_bits(key_size)?;
        let validity = ValidityDays::try_from(validity_days)?;

        let ca = self.db.get_active_ca().await?.ok_or(PkiError::NoActiveCa)?;
        let ca_id = ca.id;

        let secret = self.secret.clone();
        let material = run_blocking(move || {
            let issuer = cert::parse_certificate_pem(&ca.certificate_pem)?;
            let profile = LeafProfile::Server { san_entries };
            issue_leaf(&issuer, &ca.encrypted_private_key, &secret, &subject, validity, key_size, &profile)
        })
        .await?;

        let cert = self.db.insert_active_server_cert(material, ca_id).await?;
        info!("Issued server certificate {} for {:?} from certificate authority {ca_id}", cert.id, cert.san_entries);
        Ok(cert)
    }

    pub async fn get_active(&self) -> Result<Option<ServerCertificate>> {
        self.db.get_active_server_cert().await
    }

    pub async fn get(&self, id: i64) -> Result<ServerCertificate> {
        self.db.get_server_cert(id).await
    }

    pub async fn list(&self) -> Result<Vec<ServerCertificate>> {
        self.db.list_server_certs().await
    }

    pub async fn deactivate(&self, id: i64) -> Result<ServerCertificate> {
        let cert = self.db.deactivate_server_cert(id).await.inspect_err(|e| {
            if matches!(e, PkiError::InvalidState(_)) {
                warn!("Refused to deactivate server certificate {id}: {e}");
            }
        })?;
        info!("Deactivated server certificate {id}");
        Ok(cert)
    }

    pub async fn expunge(&self, id: i64) -> Result<()> {
        self.db.delete_server_cert(id).await.inspect_err(|e| {
            if matches!(e, PkiError::InvalidState(_)) {
                warn!("Refused to expunge server certificate {id}: {e}");
            }
        })?;
        info!("Expunged server certificate {id}");
        Ok(())
    }
}
