use thiserror::Error;

/// Every way a PKI operation can fail.
///
/// The first five variants are the lifecycle taxonomy callers act on; the rest wrap
/// infrastructure failures and surface as internal errors.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("no active certificate authority - generate a CA first")]
    NoActiveCa,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("private key decryption failed")]
    DecryptionFailure,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("openssl error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("signing error: {0}")]
    Signing(#[from] rcgen::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T, E = PkiError> = std::result::Result<T, E>;

impl PkiError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PkiError::InvalidParameter(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        PkiError::InvalidState(message.into())
    }

    pub(crate) fn not_found(what: &str, id: i64) -> Self {
        PkiError::NotFound(format!("{what} {id} does not exist"))
    }

    /// HTTP status a web collaborator should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            PkiError::InvalidParameter(_) | PkiError::NoActiveCa => 400,
            PkiError::NotFound(_) => 404,
            PkiError::InvalidState(_) => 409,
            _ => 500,
        }
    }
}

impl From<tokio::task::JoinError> for PkiError {
    fn from(error: tokio::task::JoinError) -> Self {
        PkiError::Internal(format!("blocking task failed: {error}"))
    }
}

impl From<serde_json::Error> for PkiError {
    fn from(error: serde_json::Error) -> Self {
        PkiError::Internal(error.to_string())
    }
}

impl From<anyhow::Error> for PkiError {
    fn from(error: anyhow::Error) -> Self {
        PkiError::Internal(error.to_string())
    }
}
