use chrono::{DateTime, Duration, Utc};
use openssl::bn::BigNum;
use openssl::pkey::{HasPublic, PKeyRef};
use openssl::x509::{X509Crl, X509CrlRef, X509Ref};
use rcgen::{CertificateParams, CertificateRevocationListParams, KeyIdMethod, KeyPair, RevokedCertParams, SerialNumber};
use time::OffsetDateTime;
use tracing::{debug, info};
use crate::cert;
use crate::data::enums::ValidityDays;
use crate::data::error::{PkiError, Result};

/// One revoked certificate as it appears on a CRL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokedEntry {
    /// Lowercase hex serial, as stored on the client certificate record.
    pub serial_number: String,
    pub revoked_at: DateTime<Utc>,
}

/// Signs CRLs on behalf of one issuing CA.
pub struct CrlGenerator<'a> {
    issuer_cert: &'a X509Ref,
    issuer_key_pem: &'a str,
    validity: ValidityDays,
}

impl<'a> CrlGenerator<'a> {
    pub fn new(issuer_cert: &'a X509Ref, issuer_key_pem: &'a str, validity: ValidityDays) -> Self {
        Self {
            issuer_cert,
            issuer_key_pem,
            validity,
        }
    }

    /// Generate a CRL listing `revoked`, valid from now for the configured number of days.
    pub fn generate_crl(&self, revoked: &[RevokedEntry]) -> Result<X509Crl> {
        debug!("Generating CRL with {} revoked certificates", revoked.len());

        let key_pair = KeyPair::from_pem(self.issuer_key_pem)?;
        let issuer = CertificateParams::from_ca_cert_pem(&cert::certificate_pem(self.issuer_cert)?)?
            .self_signed(&key_pair)?;

        let this_update = Utc::now();
        let next_update = this_update + Duration::days(i64::from(self.validity.days()));

        let revoked_certs = revoked
            .iter()
            .map(|entry| {
                Ok(RevokedCertParams {
                    serial_number: serial_from_hex(&entry.serial_number)?,
                    revocation_time: to_offset_date_time(entry.revoked_at)?,
                    reason_code: None,
                    invalidity_date: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let crl = CertificateRevocationListParams {
            this_update: to_offset_date_time(this_update)?,
            next_update: to_offset_date_time(next_update)?,
            crl_number: crl_number(this_update),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&issuer, &key_pair)?;

        let der: &[u8] = crl.der().as_ref();
        let crl = X509Crl::from_der(der)?;

        info!("Generated CRL with {} revoked certificates, valid for {} days", revoked.len(), self.validity.days());
        Ok(crl)
    }
}

/// Builds and signs a CRL for `issuer_cert`.
pub fn build_crl(
    issuer_cert: &X509Ref,
    issuer_key_pem: &str,
    revoked: &[RevokedEntry],
    validity: ValidityDays,
) -> Result<X509Crl> {
    CrlGenerator::new(issuer_cert, issuer_key_pem, validity).generate_crl(revoked)
}

pub fn crl_pem(crl: &X509CrlRef) -> Result<Vec<u8>> {
    Ok(crl.to_pem()?)
}

/// Lowercase hex serials listed on the CRL.
pub fn revoked_serials(crl: &X509CrlRef) -> Result<Vec<String>> {
    let Some(revoked) = crl.get_revoked() else { return Ok(Vec::new()) };
    revoked
        .iter()
        .map(|entry| Ok(entry.serial_number().to_bn()?.to_hex_str()?.to_lowercase()))
        .collect()
}

pub fn is_serial_revoked(crl: &X509CrlRef, serial_hex: &str) -> Result<bool> {
    let wanted = serial_hex.trim_start_matches('0').to_lowercase();
    Ok(revoked_serials(crl)?
        .iter()
        .any(|serial| serial.trim_start_matches('0') == wanted))
}

/// Checks the CRL signature against an issuer public key.
pub fn verify_crl<T: HasPublic>(crl: &X509CrlRef, issuer_key: &PKeyRef<T>) -> Result<bool> {
    Ok(crl.verify(issuer_key)?)
}

fn serial_from_hex(serial_hex: &str) -> Result<SerialNumber> {
    let serial = BigNum::from_hex_str(serial_hex)
        .map_err(|_| PkiError::Internal(format!("stored serial is not hex: {serial_hex}")))?;
    Ok(SerialNumber::from_slice(&serial.to_vec()))
}

// Millisecond issuance time keeps successive CRL numbers increasing.
fn crl_number(issued_at: DateTime<Utc>) -> SerialNumber {
    SerialNumber::from(issued_at.timestamp_millis().max(0) as u64)
}

fn to_offset_date_time(time: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(time.timestamp()).map_err(|e| PkiError::Internal(format!("CRL time out of range: {e}")))
}
