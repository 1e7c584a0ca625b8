use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TlsBackend {
    Rustls,
    NativeTls,
}

impl Default for TlsBackend {
    fn default() -> Self {
        Self::Rustls
    }
}

/// Drivebox application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Provider authorization endpoint
    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    /// Provider token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Interface the local callback listener binds to
    #[serde(default = "default_callback_host")]
    pub callback_host: String,

    #[serde(default = "default_callback_port")]
    pub callback_port: u16,

    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// How long to wait for the browser redirect before giving up
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// Time allowed for the final browser response to flush before the listener is closed
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_token_path")]
    pub token_path: String,

    /// Env file holding GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET
    #[serde(default = "default_env_file")]
    pub env_file: String,

    /// URL probed by `auth check`
    #[serde(default = "default_check_url")]
    pub check_url: String,

    #[serde(default = "default_tls_backend")]
    pub tls_backend: TlsBackend,

    /// HTTP proxy URL (optional)
    /// Supported formats: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default)]
    pub proxy_username: Option<String>,

    #[serde(default)]
    pub proxy_password: Option<String>,

    /// Config file path (runtime metadata, not written to JSON)
    #[serde(skip)]
    pub(crate) config_path: Option<PathBuf>,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/drive".to_string()]
}

fn default_callback_host() -> String {
    "127.0.0.1".to_string()
}

fn default_callback_port() -> u16 {
    9999
}

fn default_callback_path() -> String {
    "/oauth/callback".to_string()
}

fn default_callback_timeout_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    3
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_token_path() -> String {
    "token.json".to_string()
}

fn default_env_file() -> String {
    ".env".to_string()
}

fn default_check_url() -> String {
    "https://www.googleapis.com/drive/v3/files/root?fields=id".to_string()
}

fn default_tls_backend() -> TlsBackend {
    TlsBackend::Rustls
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            callback_host: default_callback_host(),
            callback_port: default_callback_port(),
            callback_path: default_callback_path(),
            callback_timeout_secs: default_callback_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            token_path: default_token_path(),
            env_file: default_env_file(),
            check_url: default_check_url(),
            tls_backend: default_tls_backend(),
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            config_path: None,
        }
    }
}

impl Config {
    /// Get default config file path
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// Redirect URI registered with the provider.
    ///
    /// Always `localhost`, whatever interface the listener binds to, so it matches
    /// the URI registered for desktop clients.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.callback_port, self.callback_path)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // Config file doesn't exist, return default config
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if !config.callback_path.starts_with('/') {
            anyhow::bail!("callbackPath must start with '/': {}", config.callback_path);
        }
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get config file path (if available)
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}
