use anyhow::Result;
use chrono::{Duration, Utc};
use mytracks_pki::{EntityKind, Pki, PkiError, PkiSecret, Settings};
use openssl::pkey::PKey;
use openssl::x509::X509;
use x509_parser::extensions::ParsedExtension;
use x509_parser::oid_registry::OID_PKCS1_SHA256WITHRSA;
use x509_parser::prelude::{FromDer, X509Certificate};
use crate::common::constants::*;
use crate::common::helper::{close_to, pem_to_der};
use crate::common::test_pki::TestPki;

#[tokio::test]
async fn test_create_ca() -> Result<()> {
    let pki = TestPki::new();
    let ca = pki.create_test_ca().await?;

    assert!(ca.is_active);
    assert_eq!(ca.common_name, TEST_CA_NAME);
    assert_eq!(ca.key_size.bits(), TEST_KEY_SIZE);
    assert_eq!(ca.fingerprint.split(':').count(), 32);
    assert!(close_to(ca.not_valid_before, Utc::now(), 60));
    assert!(close_to(ca.not_valid_after, Utc::now() + Duration::days(TEST_VALIDITY_DAYS), 60));

    let der = pem_to_der(ca.certificate_pem.as_bytes())?;
    let (_, cert) = X509Certificate::from_der(&der)?;

    assert_eq!(cert.subject(), cert.issuer());
    assert_eq!(cert.subject().iter_common_name().next().unwrap().as_str()?, TEST_CA_NAME);
    assert_eq!(cert.subject().iter_organization().next().unwrap().as_str()?, "My Tracks");
    assert_eq!(cert.signature_algorithm.algorithm, OID_PKCS1_SHA256WITHRSA);

    let basic_constraints = cert.basic_constraints()?.expect("basic constraints");
    assert!(basic_constraints.critical);
    assert!(basic_constraints.value.ca);
    assert!(basic_constraints.value.path_len_constraint.is_none());

    let key_usage = cert.key_usage()?.expect("key usage");
    assert!(key_usage.critical);
    assert!(key_usage.value.digital_signature());
    assert!(key_usage.value.key_cert_sign());
    assert!(key_usage.value.crl_sign());

    assert!(cert
        .extensions()
        .iter()
        .any(|ext| !ext.critical && matches!(ext.parsed_extension(), ParsedExtension::SubjectKeyIdentifier(_))));

    Ok(())
}

#[tokio::test]
async fn test_ca_key_sizes() -> Result<()> {
    let pki = TestPki::new();

    for bits in [2048u32, 3072, 4096] {
        let ca = pki.create_ca("Sized CA", TEST_VALIDITY_DAYS, bits).await?;
        let cert = X509::from_pem(ca.certificate_pem.as_bytes())?;
        assert_eq!(cert.public_key()?.bits(), bits);
        assert_eq!(ca.key_size.bits(), bits);
    }

    Ok(())
}

#[tokio::test]
async fn test_rotation_keeps_one_active_ca() -> Result<()> {
    let pki = TestPki::new();
    let first = pki.create_test_ca().await?;
    let second = pki.create_ca("Rotated CA", TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;

    let cas = pki.list_cas().await?;
    assert_eq!(cas.len(), 2);
    assert_eq!(cas.iter().filter(|ca| ca.is_active).count(), 1);
    assert_eq!(pki.get_active_ca().await?.id, second.id);
    assert!(!pki.get_ca(first.id).await?.is_active);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_ca_creation() -> Result<()> {
    let pki = TestPki::new();
    let (a, b) = tokio::join!(
        pki.create_ca("Racing CA 1", TEST_VALIDITY_DAYS, TEST_KEY_SIZE),
        pki.create_ca("Racing CA 2", TEST_VALIDITY_DAYS, TEST_KEY_SIZE),
    );
    a?;
    b?;

    let cas = pki.list_cas().await?;
    assert_eq!(cas.len(), 2);
    assert_eq!(cas.iter().filter(|ca| ca.is_active).count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_create_ca_rejects_invalid_parameters() -> Result<()> {
    let pki = TestPki::new();

    let err = pki.create_ca("   ", TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidParameter(ref m) if m == "non-empty name required"));

    let err = pki.create_ca(TEST_CA_NAME, TEST_VALIDITY_DAYS, 1024).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidParameter(ref m) if m == "key_size not allowed"));

    for days in [0, -1, 36501] {
        let err = pki.create_ca(TEST_CA_NAME, days, TEST_KEY_SIZE).await.unwrap_err();
        assert!(matches!(err, PkiError::InvalidParameter(ref m) if m.contains("validity_days")));
        assert_eq!(err.http_status(), 400);
    }

    assert!(pki.list_cas().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_get_active_ca_without_ca() -> Result<()> {
    let pki = TestPki::new();
    let err = pki.get_active_ca().await.unwrap_err();
    assert!(matches!(err, PkiError::NotFound(_)));
    assert_eq!(err.http_status(), 404);

    assert!(matches!(pki.get_ca(99999).await, Err(PkiError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_deactivate_ca() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let ca = pki.get_active_ca().await?;

    let deactivated = pki.deactivate_ca(ca.id).await?;
    assert!(!deactivated.is_active);
    assert!(matches!(pki.get_active_ca().await, Err(PkiError::NotFound(_))));

    let err = pki.deactivate_ca(ca.id).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidState(_)));
    assert_eq!(err.http_status(), 409);

    assert!(matches!(pki.deactivate_ca(99999).await, Err(PkiError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_expunge_ca() -> Result<()> {
    let pki = TestPki::new_with_server_cert().await;
    let ca = pki.get_active_ca().await?;
    let server = pki.get_active_server_cert().await?;

    let err = pki.expunge_ca(ca.id).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidState(_)));
    assert!(pki.get_ca(ca.id).await.is_ok());

    pki.deactivate_ca(ca.id).await?;
    pki.expunge_ca(ca.id).await?;

    assert!(matches!(pki.get_ca(ca.id).await, Err(PkiError::NotFound(_))));
    // Certificates issued by an expunged CA go with it.
    assert!(matches!(pki.get_server_cert(server.id).await, Err(PkiError::NotFound(_))));
    assert!(matches!(pki.expunge_ca(ca.id).await, Err(PkiError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_download_ca_cert() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let ca = pki.get_active_ca().await?;

    let download = pki.download_cert_pem(EntityKind::CertificateAuthority, ca.id).await?;
    assert_eq!(download.content_type, "application/x-pem-file");
    assert!(download.file_name.ends_with(".pem"));
    assert!(String::from_utf8(download.body.to_vec())?.starts_with("-----BEGIN CERTIFICATE-----"));

    assert!(matches!(
        pki.download_cert_pem(EntityKind::CertificateAuthority, 99999).await,
        Err(PkiError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_download_ca_private_key() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let ca = pki.get_active_ca().await?;

    let download = pki.download_private_key_pem(EntityKind::CertificateAuthority, ca.id).await?;
    assert!(download.file_name.ends_with(".pem"));

    let key = PKey::private_key_from_pem(&download.body)?;
    let cert = X509::from_pem(ca.certificate_pem.as_bytes())?;
    let cert_key = cert.public_key()?;
    assert!(key.public_eq(&cert_key));
    Ok(())
}

#[tokio::test]
async fn test_wrong_secret_cannot_sign() -> Result<()> {
    let path = std::env::temp_dir().join(format!("mytracks-pki-wrong-secret-{}.sqlite", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let settings = Settings::in_memory().with_database_path(&path);

    let pki = Pki::new(settings.clone(), PkiSecret::new(TEST_SECRET)?)?;
    pki.create_ca(TEST_CA_NAME, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;

    let other = Pki::new(settings, PkiSecret::new("a-different-secret")?)?;
    let err = other
        .issue_server_cert(TEST_SERVER_NAME, &test_sans(), TEST_VALIDITY_DAYS, TEST_KEY_SIZE)
        .await
        .unwrap_err();
    assert!(matches!(err, PkiError::DecryptionFailure));
    assert!(other.list_server_certs().await?.is_empty());

    drop(pki);
    drop(other);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
    Ok(())
}

#[tokio::test]
async fn test_pki_from_env() -> Result<()> {
    let pki = Pki::from_env().await?;
    assert_eq!(pki.settings().organization, "My Tracks");

    let ca = pki.create_ca(&pki.settings().default_ca_common_name, 30, TEST_KEY_SIZE).await?;
    assert_eq!(ca.common_name, "My Tracks CA");
    Ok(())
}
