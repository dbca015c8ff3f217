use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use x509_parser::pem::parse_x509_pem;

/// DER bytes of the first PEM block in `pem`.
pub fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| anyhow!("invalid PEM: {e}"))?;
    Ok(pem.contents)
}

/// Whether `time` lies within `tolerance_s` seconds of `expected`.
pub fn close_to(time: DateTime<Utc>, expected: DateTime<Utc>, tolerance_s: i64) -> bool {
    (time - expected).num_seconds().abs() <= tolerance_s
}
