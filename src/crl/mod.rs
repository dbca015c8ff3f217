pub mod generator;

pub use generator::{build_crl, crl_pem, is_serial_revoked, revoked_serials, verify_crl, CrlGenerator, RevokedEntry};
