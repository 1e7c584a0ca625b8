//! HTTP Client builder module
//!
//! Builds the reqwest client used for the token endpoint and the session probe

use reqwest::{Client, Proxy};
use std::time::Duration;

use crate::model::config::{Config, TlsBackend};

/// Proxy configuration
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Proxy URL, supports http/https/socks5
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy settings from the config file, if a proxy URL is set
    pub fn from_config(config: &Config) -> Option<Self> {
        let url = config.proxy_url.as_deref()?.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            url: url.to_string(),
            username: config.proxy_username.clone(),
            password: config.proxy_password.clone(),
        })
    }
}

/// Build HTTP Client
///
/// Redirects are disabled: the token endpoint answers directly and a redirect
/// must not carry the form body to another host.
pub fn build_client(config: &Config) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .redirect(reqwest::redirect::Policy::none());

    if config.tls_backend == TlsBackend::Rustls {
        builder = builder.use_rustls_tls();
    }

    if let Some(proxy_config) = ProxyConfig::from_config(config) {
        let mut proxy = Proxy::all(&proxy_config.url)?;

        if let (Some(username), Some(password)) = (&proxy_config.username, &proxy_config.password) {
            proxy = proxy.basic_auth(username, password);
        }

        builder = builder.proxy(proxy);
        tracing::debug!("HTTP Client using proxy: {}", proxy_config.url);
    }

    Ok(builder.build()?)
}
