use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time, Asn1TimeRef};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName, SubjectKeyIdentifier};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509NameRef, X509Ref, X509};
use tracing::debug;
use zeroize::Zeroizing;
use crate::constants::{RSA_PUBLIC_EXPONENT, SERIAL_NUMBER_BITS};
use crate::data::enums::{KeySize, ValidityDays};
use crate::data::error::{PkiError, Result};
use crate::helper::require_name;

/// Subject of a certificate: a common name and the optional organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectName {
    pub common_name: String,
    pub organization: Option<String>,
}

impl SubjectName {
    /// Trims the common name and rejects blank input.
    pub fn new(common_name: &str, organization: Option<&str>) -> Result<Self> {
        Ok(Self {
            common_name: require_name(common_name)?,
            organization: organization.map(str::to_string).filter(|o| !o.is_empty()),
        })
    }

    fn to_x509_name(&self) -> Result<X509Name, ErrorStack> {
        let mut name_builder = X509NameBuilder::new()?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, &self.common_name)?;
        if let Some(organization) = &self.organization {
            name_builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
        }
        Ok(name_builder.build())
    }
}

/// One SubjectAlternativeName entry, classified by whether it parses as an IP literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SanEntry {
    Dns(String),
    Ip(IpAddr),
}

impl SanEntry {
    pub fn classify(entry: &str) -> Self {
        match entry.parse::<IpAddr>() {
            Ok(ip) => SanEntry::Ip(ip),
            Err(_) => SanEntry::Dns(entry.to_string()),
        }
    }
}

impl Display for SanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanEntry::Dns(name) => f.write_str(name),
            SanEntry::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Trims and classifies the SANs of a server certificate, keeping caller order.
pub fn parse_san_entries(entries: &[String]) -> Result<Vec<SanEntry>> {
    let trimmed: Vec<&str> = entries.iter().map(|e| e.trim()).collect();
    if trimmed.is_empty() || trimmed.iter().any(|e| e.is_empty()) {
        return Err(PkiError::invalid("at least one SAN required"));
    }
    Ok(trimmed.into_iter().map(SanEntry::classify).collect())
}

/// Extension set of a leaf certificate.
#[derive(Clone, Debug)]
pub enum LeafProfile {
    Server { san_entries: Vec<SanEntry> },
    Client,
}

/// A freshly signed certificate together with its private key.
pub struct IssuedCertificate {
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl IssuedCertificate {
    pub fn certificate_pem(&self) -> Result<String> {
        certificate_pem(&self.certificate)
    }

    /// PKCS#8 PEM of the private key, wiped when dropped.
    pub fn private_key_pem(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(self.private_key.private_key_to_pem_pkcs8()?))
    }
}

pub struct CertificateBuilder {
    x509: X509Builder,
    private_key: PKey<Private>,
    subject: Option<X509Name>,
    validity_set: bool,
}

impl CertificateBuilder {
    pub fn new(key_size: KeySize) -> Result<Self> {
        let private_key = generate_private_key(key_size)?;
        let asn1_serial = generate_serial_number()?;
        let not_before = Asn1Time::days_from_now(0)?;

        let mut x509 = X509Builder::new()?;
        x509.set_version(2)?;
        x509.set_serial_number(&asn1_serial)?;
        x509.set_not_before(&not_before)?;
        x509.set_pubkey(&private_key)?;

        Ok(Self {
            x509,
            private_key,
            subject: None,
            validity_set: false,
        })
    }

    pub fn set_subject(mut self, subject: &SubjectName) -> Result<Self> {
        let name = subject.to_x509_name()?;
        self.x509.set_subject_name(&name)?;
        self.subject = Some(name);
        Ok(self)
    }

    pub fn set_validity(mut self, validity: ValidityDays) -> Result<Self> {
        let not_after = Asn1Time::days_from_now(validity.days())?;
        self.x509.set_not_after(&not_after)?;
        self.validity_set = true;
        Ok(self)
    }

    pub fn build_ca(mut self) -> Result<IssuedCertificate> {
        let subject = self.subject.take().ok_or(PkiError::Internal("X509: subject not set".into()))?;
        if !self.validity_set {
            return Err(PkiError::Internal("X509: validity not set".into()));
        }
        self.x509.set_issuer_name(&subject)?;

        let basic_constraints = BasicConstraints::new().critical().ca().build()?;
        self.x509.append_extension(basic_constraints)?;

        let key_usage = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_cert_sign()
            .crl_sign()
            .build()?;
        self.x509.append_extension(key_usage)?;

        let subject_key_identifier = SubjectKeyIdentifier::new().build(&self.x509.x509v3_context(None, None))?;
        self.x509.append_extension(subject_key_identifier)?;

        self.x509.sign(&self.private_key, MessageDigest::sha256())?;
        Ok(IssuedCertificate {
            certificate: self.x509.build(),
            private_key: self.private_key,
        })
    }

    pub fn build_leaf(
        mut self,
        issuer_cert: &X509Ref,
        issuer_key: &PKeyRef<Private>,
        profile: &LeafProfile,
    ) -> Result<IssuedCertificate> {
        if self.subject.is_none() {
            return Err(PkiError::Internal("X509: subject not set".into()));
        }
        if !self.validity_set {
            return Err(PkiError::Internal("X509: validity not set".into()));
        }
        self.x509.set_issuer_name(issuer_cert.subject_name())?;

        let basic_constraints = BasicConstraints::new().critical().build()?;
        self.x509.append_extension(basic_constraints)?;

        let key_usage = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?;
        self.x509.append_extension(key_usage)?;

        match profile {
            LeafProfile::Server { san_entries } => {
                let ext_key_usage = ExtendedKeyUsage::new().server_auth().build()?;
                self.x509.append_extension(ext_key_usage)?;

                let mut san_builder = SubjectAlternativeName::new();
                for entry in san_entries {
                    match entry {
                        SanEntry::Dns(name) => san_builder.dns(name),
                        SanEntry::Ip(ip) => san_builder.ip(&ip.to_string()),
                    };
                }
                let san = san_builder.build(&self.x509.x509v3_context(Some(issuer_cert), None))?;
                self.x509.append_extension(san)?;
            }
            LeafProfile::Client => {
                let ext_key_usage = ExtendedKeyUsage::new().client_auth().build()?;
                self.x509.append_extension(ext_key_usage)?;
            }
        }

        let subject_key_identifier = SubjectKeyIdentifier::new().build(&self.x509.x509v3_context(Some(issuer_cert), None))?;
        self.x509.append_extension(subject_key_identifier)?;
        let authority_key_identifier = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&self.x509.x509v3_context(Some(issuer_cert), None))?;
        self.x509.append_extension(authority_key_identifier)?;

        self.x509.sign(issuer_key, MessageDigest::sha256())?;
        Ok(IssuedCertificate {
            certificate: self.x509.build(),
            private_key: self.private_key,
        })
    }
}

/// Generates an RSA key pair with public exponent 65537.
pub fn generate_key_pair(key_size: u32) -> Result<PKey<Private>> {
    let key_size = KeySize::from_bits(key_size)?;
    generate_private_key(key_size)
}

fn generate_private_key(key_size: KeySize) -> Result<PKey<Private>> {
    debug!("Generating {}-bit RSA key pair", key_size);
    let exponent = BigNum::from_u32(RSA_PUBLIC_EXPONENT)?;
    let rsa = Rsa::generate_with_e(key_size.bits(), &exponent)?;
    Ok(PKey::from_rsa(rsa)?)
}

/// Random positive serial number drawn from a 160-bit space.
fn generate_serial_number() -> Result<Asn1Integer, ErrorStack> {
    let mut big_serial = BigNum::new()?;
    big_serial.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
    big_serial.to_asn1_integer()
}

/// Creates a self-signed CA certificate and its key.
pub fn sign_self_signed_ca(subject: &SubjectName, validity: ValidityDays, key_size: KeySize) -> Result<IssuedCertificate> {
    CertificateBuilder::new(key_size)?
        .set_subject(subject)?
        .set_validity(validity)?
        .build_ca()
}

/// Creates a leaf certificate signed by `issuer_cert`/`issuer_key`.
pub fn sign_leaf_certificate(
    issuer_cert: &X509Ref,
    issuer_key: &PKeyRef<Private>,
    subject: &SubjectName,
    validity: ValidityDays,
    key_size: KeySize,
    profile: &LeafProfile,
) -> Result<IssuedCertificate> {
    if let LeafProfile::Server { san_entries } = profile {
        if san_entries.is_empty() {
            return Err(PkiError::invalid("at least one SAN required"));
        }
    }
    CertificateBuilder::new(key_size)?
        .set_subject(subject)?
        .set_validity(validity)?
        .build_leaf(issuer_cert, issuer_key, profile)
}

pub fn parse_certificate_pem(pem: &str) -> Result<X509> {
    Ok(X509::from_pem(pem.as_bytes())?)
}

pub fn certificate_pem(cert: &X509Ref) -> Result<String> {
    String::from_utf8(cert.to_pem()?).map_err(|e| PkiError::Internal(e.to_string()))
}

/// SHA-256 over the DER encoding, as colon-separated uppercase hex pairs.
pub fn fingerprint(cert: &X509Ref) -> Result<String> {
    let digest = cert.digest(MessageDigest::sha256())?;
    Ok(digest.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":"))
}

fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

pub fn subject_common_name(cert: &X509Ref) -> Option<String> {
    name_entry(cert.subject_name(), Nid::COMMONNAME)
}

pub fn organization(cert: &X509Ref) -> Option<String> {
    name_entry(cert.subject_name(), Nid::ORGANIZATIONNAME)
}

const METADATA_ATTRIBUTES: [(&str, Nid); 6] = [
    ("CN", Nid::COMMONNAME),
    ("O", Nid::ORGANIZATIONNAME),
    ("OU", Nid::ORGANIZATIONALUNITNAME),
    ("C", Nid::COUNTRYNAME),
    ("ST", Nid::STATEORPROVINCENAME),
    ("L", Nid::LOCALITYNAME),
];

/// Subject attributes present on the certificate, keyed by short name.
pub fn metadata(cert: &X509Ref) -> BTreeMap<String, String> {
    METADATA_ATTRIBUTES
        .iter()
        .filter_map(|(short, nid)| name_entry(cert.subject_name(), *nid).map(|v| (short.to_string(), v)))
        .collect()
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| PkiError::Internal(format!("certificate time out of range: {time}")))
}

pub fn not_before(cert: &X509Ref) -> Result<DateTime<Utc>> {
    asn1_to_utc(cert.not_before())
}

pub fn expiry(cert: &X509Ref) -> Result<DateTime<Utc>> {
    asn1_to_utc(cert.not_after())
}

pub fn serial_number(cert: &X509Ref) -> Result<BigNum> {
    Ok(cert.serial_number().to_bn()?)
}

/// Lowercase hex rendering of the serial, without leading zeros.
pub fn serial_number_hex(cert: &X509Ref) -> Result<String> {
    Ok(serial_number(cert)?.to_hex_str()?.to_lowercase())
}

/// DNS names and IP literals in the order they appear in the SAN extension.
pub fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(names) = cert.subject_alt_names() else { return Vec::new() };
    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(dns.to_string());
            }
            name.ipaddress().and_then(ip_from_octets).map(|ip| ip.to_string())
        })
        .collect()
}

fn ip_from_octets(octets: &[u8]) -> Option<IpAddr> {
    match octets.len() {
        4 => <[u8; 4]>::try_from(octets).ok().map(|o| IpAddr::V4(Ipv4Addr::from(o))),
        16 => <[u8; 16]>::try_from(octets).ok().map(|o| IpAddr::V6(Ipv6Addr::from(o))),
        _ => None,
    }
}

pub fn key_bits(cert: &X509Ref) -> Result<u32> {
    Ok(cert.public_key()?.bits())
}
