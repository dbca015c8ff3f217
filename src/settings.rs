use std::env;
use std::path::{Path, PathBuf};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::constants::{DEFAULT_CA_COMMON_NAME, DEFAULT_ORGANIZATION, SETTINGS_FILE_PATH, SETTINGS_PATH_ENV};
use crate::data::enums::{KeySize, ValidityDays};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
/// Settings of the embedded PKI.
pub struct Settings {
    /// SQLite file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    pub pool_size: u32,
    /// Organization placed in CA and server certificate subjects.
    pub organization: String,
    pub default_ca_common_name: String,
    pub default_key_size: KeySize,
    pub default_validity_days: ValidityDays,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: 8,
            organization: DEFAULT_ORGANIZATION.to_string(),
            default_ca_common_name: DEFAULT_CA_COMMON_NAME.to_string(),
            default_key_size: KeySize::default(),
            default_validity_days: ValidityDays::default(),
        }
    }
}

impl Settings {
    /// Load settings from `file_path`, the path in `MYTRACKS_PKI_SETTINGS`, or `settings.json`.
    ///
    /// A missing file yields the defaults.
    pub async fn load_from_file(file_path: Option<&Path>) -> anyhow::Result<Self> {
        let file_path = match file_path {
            Some(path) => path.to_path_buf(),
            None => env::var(SETTINGS_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(SETTINGS_FILE_PATH)),
        };

        if !tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
            info!("No settings at {}, using defaults", file_path.display());
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(&file_path)
            .await
            .with_context(|| format!("reading settings file {}", file_path.display()))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("parsing settings file {}", file_path.display()))?;
        debug!("Loaded settings from {}", file_path.display());

        Ok(settings)
    }

    /// Settings for an in-memory database, used by tests and short-lived tools.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}
