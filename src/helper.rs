use std::{env, fs};
use std::path::Path;
use anyhow::Context;
use crate::data::error::{PkiError, Result};

/// Get secret
///
/// The environment variable holds either the secret itself or a path to a file
/// containing it; without the variable, `/run/secrets/<name>` is read.
pub fn get_secret(name: &str) -> anyhow::Result<String> {
    if let Ok(env_var) = env::var(name) {
        Ok(if Path::new(&env_var).exists() {
            fs::read_to_string(&env_var)
                .with_context(|| format!("reading secret file {env_var}"))?
                .trim()
                .to_string()
        } else {
            env_var
        })
    } else {
        let path = format!("/run/secrets/{name}");
        Ok(fs::read_to_string(&path)
            .with_context(|| format!("{name} is not set and {path} is not readable"))?
            .trim()
            .to_string())
    }
}

/// Trimmed name, or `InvalidParameter` when nothing is left.
pub(crate) fn require_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PkiError::invalid("non-empty name required"));
    }
    Ok(name.to_string())
}
