use std::sync::Arc;
use tracing::{info, warn};
use crate::cert::{self, SubjectName};
use crate::crypto::PkiSecret;
use crate::data::enums::{KeySize, ValidityDays};
use crate::data::error::{PkiError, Result};
use crate::data::objects::{CertificateAuthority, CertificateMaterial};
use crate::db::PkiDB;
use crate::pki::run_blocking;
use crate::settings::Settings;

/// Owns the single active certificate authority.
#[derive(Clone, Debug)]
pub struct CaManager {
    db: PkiDB,
    secret: Arc<PkiSecret>,
    settings: Arc<Settings>,
}

impl CaManager {
    pub(crate) fn new(db: PkiDB, secret: Arc<PkiSecret>, settings: Arc<Settings>) -> Self {
        Self { db, secret, settings }
    }

    /// Generate a new self-signed CA and make it the active one.
    ///
    /// The previous active CA, if any, is demoted in the same transaction.
    pub async fn create(&self, common_name: &str, validity_days: i64, key_size: u32) -> Result<CertificateAuthority> {
        let subject = SubjectName::new(common_name, Some(&self.settings.organization))?;
        let key_size = KeySize::from_bits(key_size)?;
        let validity = ValidityDays::try_from(validity_days)?;

        let secret = self.secret.clone();
        let material = run_blocking(move || {
            let issued = cert::sign_self_signed_ca(&subject, validity, key_size)?;
            CertificateMaterial::seal(&issued, key_size, &secret)
        })
        .await?;

        let ca = self.db.insert_active_ca(material).await?;
        info!("Created certificate authority {} ({}), now active", ca.id, ca.common_name);
        Ok(ca)
    }

    pub async fn get_active(&self) -> Result<Option<CertificateAuthority>> {
        self.db.get_active_ca().await
    }

    /// The active CA, or `NoActiveCa` for operations that need one to sign with.
    pub async fn require_active(&self) -> Result<CertificateAuthority> {
        self.db.get_active_ca().await?.ok_or(PkiError::NoActiveCa)
    }

    pub async fn get(&self, id: i64) -> Result<CertificateAuthority> {
        self.db.get_ca(id).await
    }

    pub async fn list(&self) -> Result<Vec<CertificateAuthority>> {
        self.db.list_cas().await
    }

    pub async fn deactivate(&self, id: i64) -> Result<CertificateAuthority> {
        let ca = self.db.deactivate_ca(id).await.inspect_err(|e| {
            if matches!(e, PkiError::InvalidState(_)) {
                warn!("Refused to deactivate certificate authority {id}: {e}");
            }
        })?;
        info!("Deactivated certificate authority {id}");
        Ok(ca)
    }

    /// Permanently delete an inactive CA and every certificate it issued.
    pub async fn expunge(&self, id: i64) -> Result<()> {
        self.db.delete_ca(id).await.inspect_err(|e| {
            if matches!(e, PkiError::InvalidState(_)) {
                warn!("Refused to expunge certificate authority {id}: {e}");
            }
        })?;
        info!("Expunged certificate authority {id}");
        Ok(())
    }
}
