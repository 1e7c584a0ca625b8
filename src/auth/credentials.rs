//! Client credential source
//!
//! Credentials are read from the process environment after loading the env
//! file, the same file `drivebox auth setup` writes.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::fs_util::write_atomic;

pub const CLIENT_ID_VAR: &str = "GOOGLE_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "GOOGLE_CLIENT_SECRET";

/// Supplier of the registered application's identity
pub trait CredentialSource: Send + Sync {
    fn client_id(&self) -> String;
    fn client_secret(&self) -> String;
    fn scopes(&self) -> Vec<String>;
}

/// Credentials from environment variables, seeded from an env file
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    scopes: Vec<String>,
}

impl EnvCredentials {
    /// Load `env_file` into the process environment, then read credentials from it.
    ///
    /// A missing env file is not an error: the variables may already be exported.
    /// Variables already present in the environment win over the file.
    pub fn load(env_file: &Path, scopes: Vec<String>) -> anyhow::Result<Self> {
        match dotenvy::from_path(env_file) {
            Ok(()) => tracing::debug!("Loaded env file {}", env_file.display()),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Env file {} not found, using process environment", env_file.display());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Error loading env file {}", env_file.display()));
            }
        }
        Ok(Self { scopes })
    }
}

impl CredentialSource for EnvCredentials {
    fn client_id(&self) -> String {
        std::env::var(CLIENT_ID_VAR).unwrap_or_default()
    }

    fn client_secret(&self) -> String {
        std::env::var(CLIENT_SECRET_VAR).unwrap_or_default()
    }

    fn scopes(&self) -> Vec<String> {
        self.scopes.clone()
    }
}

/// Fixed credentials
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

#[cfg(test)]
impl CredentialSource for StaticCredentials {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn client_secret(&self) -> String {
        self.client_secret.clone()
    }

    fn scopes(&self) -> Vec<String> {
        self.scopes.clone()
    }
}

/// Env file contents holding the client credentials
fn render_env_file(client_id: &str, client_secret: &str) -> String {
    format!(
        "{}={}\n{}={}\n",
        CLIENT_ID_VAR,
        quote_env_value(client_id),
        CLIENT_SECRET_VAR,
        quote_env_value(client_secret)
    )
}

/// Bare value when it is plain, otherwise double-quoted with dotenv escapes
fn quote_env_value(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii_alphanumeric() || "-_.:/@+".contains(c)) {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Replace the env file with the given credentials
pub fn write_env_file(path: &Path, client_id: &str, client_secret: &str) -> anyhow::Result<PathBuf> {
    let content = render_env_file(client_id.trim(), client_secret.trim());
    write_atomic(path, content.as_bytes())
        .with_context(|| format!("Failed to write env file {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Masks all but the first few characters of an identifier for logging
pub fn mask(value: &str) -> String {
    let visible: String = value.chars().take(6).collect();
    if visible.len() == value.len() {
        "***".to_string()
    } else {
        format!("{}***", visible)
    }
}
