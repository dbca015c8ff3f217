use std::fmt::Display;
use std::str::FromStr;
use num_enum::TryFromPrimitive;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use crate::constants::{DEFAULT_KEY_SIZE, DEFAULT_VALIDITY_DAYS, MAX_VALIDITY_DAYS, MIN_VALIDITY_DAYS};
use crate::data::error::PkiError;

#[derive(Serialize_repr, Deserialize_repr, TryFromPrimitive, Clone, Debug, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
/// RSA modulus size of a generated key pair.
pub enum KeySize {
    Rsa2048 = 2048,
    Rsa3072 = 3072,
    Rsa4096 = 4096,
}

impl KeySize {
    /// Validates a caller-supplied modulus size.
    pub fn from_bits(bits: u32) -> Result<Self, PkiError> {
        u16::try_from(bits)
            .ok()
            .and_then(|bits| KeySize::try_from_primitive(bits).ok())
            .ok_or_else(|| PkiError::invalid("key_size not allowed"))
    }

    pub fn bits(self) -> u32 {
        self as u32
    }
}

impl Default for KeySize {
    fn default() -> Self {
        KeySize::from_bits(DEFAULT_KEY_SIZE).unwrap_or(KeySize::Rsa4096)
    }
}

impl FromStr for KeySize {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits: u32 = s.trim().parse().map_err(|_| PkiError::invalid("key_size not allowed"))?;
        KeySize::from_bits(bits)
    }
}

impl Display for KeySize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl FromSql for KeySize {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => {
                u16::try_from(i)
                    .ok()
                    .and_then(|bits| KeySize::try_from_primitive(bits).ok())
                    .ok_or(FromSqlError::OutOfRange(i))
            },
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for KeySize {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.bits() as i64))
    }
}

/// Number of days a certificate or CRL stays valid, within `[1, 36500]`.
#[derive(Serialize, Deserialize, Clone, Debug, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "i64", into = "i64")]
pub struct ValidityDays(u32);

impl ValidityDays {
    pub fn days(self) -> u32 {
        self.0
    }
}

impl Default for ValidityDays {
    fn default() -> Self {
        ValidityDays(DEFAULT_VALIDITY_DAYS)
    }
}

impl TryFrom<i64> for ValidityDays {
    type Error = PkiError;

    fn try_from(days: i64) -> Result<Self, Self::Error> {
        if !(MIN_VALIDITY_DAYS..=MAX_VALIDITY_DAYS).contains(&days) {
            return Err(PkiError::invalid(format!(
                "validity_days must be between {MIN_VALIDITY_DAYS} and {MAX_VALIDITY_DAYS}, got {days}"
            )));
        }
        Ok(ValidityDays(days as u32))
    }
}

impl From<ValidityDays> for i64 {
    fn from(days: ValidityDays) -> Self {
        days.0 as i64
    }
}

impl FromStr for ValidityDays {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let days: i64 = s
            .trim()
            .parse()
            .map_err(|_| PkiError::invalid(format!("validity_days must be an integer, got {s:?}")))?;
        ValidityDays::try_from(days)
    }
}

#[derive(Serialize_repr, Deserialize_repr, TryFromPrimitive, Clone, Debug, Copy, PartialEq, Eq)]
#[repr(u8)]
/// The three kinds of certificate record the PKI stores.
pub enum EntityKind {
    CertificateAuthority = 0,
    Server = 1,
    Client = 2,
}

impl EntityKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            EntityKind::CertificateAuthority => "certificate_authorities",
            EntityKind::Server => "server_certificates",
            EntityKind::Client => "client_certificates",
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            EntityKind::CertificateAuthority => "certificate authority",
            EntityKind::Server => "server certificate",
            EntityKind::Client => "client certificate",
        }
    }

    pub(crate) fn file_stem(self) -> &'static str {
        match self {
            EntityKind::CertificateAuthority => "ca",
            EntityKind::Server => "server",
            EntityKind::Client => "client",
        }
    }
}
