use anyhow::Result;
use chrono::{Duration, Utc};
use mytracks_pki::crl::{is_serial_revoked, revoked_serials, verify_crl};
use mytracks_pki::{EntityKind, PkiError};
use openssl::x509::{X509Crl, X509};
use x509_parser::prelude::{FromDer, X509Certificate};
use crate::common::constants::*;
use crate::common::helper::{close_to, pem_to_der};
use crate::common::test_pki::TestPki;

#[tokio::test]
async fn test_register_user() -> Result<()> {
    let pki = TestPki::new();
    let user = pki.register_user(TEST_USER_NAME).await?;
    assert_eq!(user.username, TEST_USER_NAME);

    let err = pki.register_user(TEST_USER_NAME).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidState(_)));

    let err = pki.register_user("  ").await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidParameter(_)));
    Ok(())
}

#[tokio::test]
async fn test_issue_client_cert() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let ca = pki.get_active_ca().await?;
    let (user, cert) = pki.create_user_with_cert(TEST_USER_NAME).await?;

    assert_eq!(cert.user_id, user.id);
    assert_eq!(cert.issuing_ca_id, ca.id);
    assert_eq!(cert.common_name, TEST_USER_NAME);
    assert!(cert.is_active);
    assert!(!cert.revoked);
    assert!(cert.revoked_at.is_none());
    assert_eq!(cert.serial_number, cert.serial_number.to_lowercase());
    assert!(close_to(cert.not_valid_after, Utc::now() + Duration::days(TEST_VALIDITY_DAYS), 60));

    let der = pem_to_der(cert.certificate_pem.as_bytes())?;
    let (_, parsed) = X509Certificate::from_der(&der)?;
    assert_eq!(parsed.subject().iter_common_name().next().unwrap().as_str()?, TEST_USER_NAME);
    assert_eq!(parsed.subject().iter_organization().next().unwrap().as_str()?, "My Tracks");
    assert_eq!(parsed.serial.to_str_radix(16), cert.serial_number.trim_start_matches('0'));

    let eku = parsed.extended_key_usage()?.expect("extended key usage");
    assert!(eku.value.client_auth);
    assert!(!eku.value.server_auth);
    assert!(!parsed.basic_constraints()?.expect("basic constraints").value.ca);
    assert!(parsed.subject_alternative_name()?.is_none());

    let ca_cert = X509::from_pem(ca.certificate_pem.as_bytes())?;
    let leaf = X509::from_pem(cert.certificate_pem.as_bytes())?;
    let ca_key = ca_cert.public_key()?;
    assert!(leaf.verify(&ca_key)?);
    Ok(())
}

#[tokio::test]
async fn test_issue_client_cert_failures() -> Result<()> {
    let pki = TestPki::new();
    let user = pki.register_user(TEST_USER_NAME).await?;

    let err = pki.issue_client_cert(user.id, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await.unwrap_err();
    assert!(matches!(err, PkiError::NoActiveCa));

    pki.create_test_ca().await?;
    let err = pki.issue_client_cert(99999, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await.unwrap_err();
    assert!(matches!(err, PkiError::NotFound(_)));

    let err = pki.issue_client_cert(user.id, 0, TEST_KEY_SIZE).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidParameter(_)));

    let err = pki.issue_client_cert(user.id, TEST_VALIDITY_DAYS, 512).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidParameter(_)));

    assert!(pki.list_client_certs(None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reissue_deactivates_without_revoking() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let (user, first) = pki.create_user_with_cert(TEST_USER_NAME).await?;
    let second = pki.issue_client_cert(user.id, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;

    assert_ne!(first.serial_number, second.serial_number);
    let first = pki.get_client_cert(first.id).await?;
    assert!(!first.is_active);
    assert!(!first.revoked);
    assert_eq!(pki.get_active_client_cert(user.id).await?.map(|c| c.id), Some(second.id));

    let crl = X509Crl::from_pem(&pki.build_crl(7).await?.body)?;
    assert!(revoked_serials(&crl)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_revoke_client_cert() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let (user, cert) = pki.create_user_with_cert(TEST_USER_NAME).await?;

    let revoked = pki.revoke_client_cert(cert.id).await?;
    assert!(revoked.revoked);
    assert!(!revoked.is_active);
    assert!(close_to(revoked.revoked_at.expect("revocation time"), Utc::now(), 60));
    assert!(pki.get_active_client_cert(user.id).await?.is_none());

    let err = pki.revoke_client_cert(cert.id).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidState(_)));
    assert!(matches!(pki.revoke_client_cert(99999).await, Err(PkiError::NotFound(_))));

    pki.expunge_client_cert(cert.id).await?;
    assert!(matches!(pki.get_client_cert(cert.id).await, Err(PkiError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_expunge_active_client_cert() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let (user, first) = pki.create_user_with_cert(TEST_USER_NAME).await?;

    let err = pki.expunge_client_cert(first.id).await.unwrap_err();
    assert!(matches!(err, PkiError::InvalidState(_)));

    // A superseded certificate is inactive and may go without being revoked.
    pki.issue_client_cert(user.id, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;
    pki.expunge_client_cert(first.id).await?;
    assert_eq!(pki.list_client_certs(Some(user.id)).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_list_client_certs() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let (alice, _) = pki.create_user_with_cert("alice").await?;
    let (bob, _) = pki.create_user_with_cert("bob").await?;
    let newest = pki.issue_client_cert(alice.id, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;

    assert_eq!(pki.list_client_certs(None).await?.len(), 3);

    let alices = pki.list_client_certs(Some(alice.id)).await?;
    assert_eq!(alices.len(), 2);
    assert_eq!(alices[0].id, newest.id);
    assert!(alices.iter().all(|c| c.user_id == alice.id));

    let bobs = pki.list_client_certs(Some(bob.id)).await?;
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].common_name, "bob");
    Ok(())
}

#[tokio::test]
async fn test_build_crl() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let ca = pki.get_active_ca().await?;
    let (_, kept) = pki.create_user_with_cert("alice").await?;
    let (_, revoked) = pki.create_user_with_cert("bob").await?;
    pki.revoke_client_cert(revoked.id).await?;

    let download = pki.build_crl(7).await?;
    assert_eq!(download.file_name, format!("ca-{}-crl.pem", ca.id));
    assert_eq!(download.content_type, "application/x-pem-file");
    assert!(String::from_utf8(download.body.to_vec())?.starts_with("-----BEGIN X509 CRL-----"));

    let crl = X509Crl::from_pem(&download.body)?;
    let ca_cert = X509::from_pem(ca.certificate_pem.as_bytes())?;
    let ca_key = ca_cert.public_key()?;
    assert!(verify_crl(&crl, &ca_key)?);
    assert_eq!(
        crl.issuer_name().entries().map(|e| e.data().as_slice().to_vec()).collect::<Vec<_>>(),
        ca_cert.subject_name().entries().map(|e| e.data().as_slice().to_vec()).collect::<Vec<_>>()
    );

    assert_eq!(revoked_serials(&crl)?.len(), 1);
    assert!(is_serial_revoked(&crl, &revoked.serial_number)?);
    assert!(!is_serial_revoked(&crl, &kept.serial_number)?);
    Ok(())
}

#[tokio::test]
async fn test_crl_only_lists_active_ca_revocations() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let (user, old) = pki.create_user_with_cert(TEST_USER_NAME).await?;
    pki.revoke_client_cert(old.id).await?;

    let next_ca = pki.create_ca("Next CA", TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;
    let crl = X509Crl::from_pem(&pki.build_crl(7).await?.body)?;
    assert!(revoked_serials(&crl)?.is_empty());

    let new = pki.issue_client_cert(user.id, TEST_VALIDITY_DAYS, TEST_KEY_SIZE).await?;
    assert_eq!(new.issuing_ca_id, next_ca.id);
    pki.revoke_client_cert(new.id).await?;

    let crl = X509Crl::from_pem(&pki.build_crl(7).await?.body)?;
    assert!(is_serial_revoked(&crl, &new.serial_number)?);
    assert!(!is_serial_revoked(&crl, &old.serial_number)?);
    Ok(())
}

#[tokio::test]
async fn test_build_crl_failures() -> Result<()> {
    let pki = TestPki::new();
    assert!(matches!(pki.build_crl(7).await, Err(PkiError::NoActiveCa)));

    pki.create_test_ca().await?;
    assert!(matches!(pki.build_crl(0).await, Err(PkiError::InvalidParameter(_))));
    assert!(matches!(pki.build_crl(36501).await, Err(PkiError::InvalidParameter(_))));
    Ok(())
}

#[tokio::test]
async fn test_download_client_key() -> Result<()> {
    let pki = TestPki::new_with_ca().await;
    let (_, cert) = pki.create_user_with_cert(TEST_USER_NAME).await?;

    let download = pki.download_private_key_pem(EntityKind::Client, cert.id).await?;
    assert!(download.content_disposition().contains(&download.file_name));
    assert!(!format!("{download:?}").contains("PRIVATE KEY"));

    let key = openssl::pkey::PKey::private_key_from_pem(&download.body)?;
    let leaf = X509::from_pem(cert.certificate_pem.as_bytes())?;
    let leaf_key = leaf.public_key()?;
    assert!(key.public_eq(&leaf_key));
    Ok(())
}

#[tokio::test]
async fn test_example_scenario() -> Result<()> {
    let pki = TestPki::new();

    let ca = pki.create_ca("Test CA", 3650, 2048).await?;
    assert!(ca.is_active);
    assert_eq!(ca.fingerprint.split(':').count(), 32);
    assert!(ca.fingerprint.split(':').all(|pair| pair.len() == 2));

    let sans = vec!["svc.local".to_string(), "10.0.0.5".to_string()];
    let server = pki.issue_server_cert("svc.local", &sans, 365, 2048).await?;
    assert_eq!(server.issuing_ca_id, ca.id);
    assert!(server.is_active);
    assert_eq!(server.san_entries.len(), 2);

    assert!(matches!(pki.expunge_server_cert(server.id).await, Err(PkiError::InvalidState(_))));
    pki.deactivate_server_cert(server.id).await?;
    pki.expunge_server_cert(server.id).await?;
    assert!(matches!(pki.get_server_cert(server.id).await, Err(PkiError::NotFound(_))));
    Ok(())
}
