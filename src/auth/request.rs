//! Authorization request construction

use reqwest::Url;

use super::credentials::{CredentialSource, mask};
use super::error::AuthError;
use crate::model::config::Config;

/// One sign-in attempt's parameters, fixed once built
#[derive(Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub redirect_uri: String,
    pub state_token: String,
}

impl std::fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("client_id", &mask(&self.client_id))
            .field("scopes", &self.scopes)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl AuthorizationRequest {
    /// Build a request with a fresh state nonce
    pub fn new(credentials: &dyn CredentialSource, config: &Config) -> Result<Self, AuthError> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in credentials.scopes() {
            let scope = scope.trim().to_string();
            if !scope.is_empty() && !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        let request = Self {
            client_id: credentials.client_id().trim().to_string(),
            client_secret: credentials.client_secret().trim().to_string(),
            scopes,
            authorization_endpoint: config.auth_url.trim().to_string(),
            token_endpoint: config.token_url.trim().to_string(),
            redirect_uri: config.redirect_uri(),
            state_token: generate_state_token(),
        };
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::MissingCredentials("client ID is empty".to_string()));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::MissingCredentials("client secret is empty".to_string()));
        }
        if self.scopes.is_empty() {
            return Err(AuthError::MissingCredentials("no scopes configured".to_string()));
        }
        for (name, value) in [
            ("authUrl", &self.authorization_endpoint),
            ("tokenUrl", &self.token_endpoint),
            ("redirect URI", &self.redirect_uri),
        ] {
            if Url::parse(value).is_err() {
                return Err(AuthError::MissingCredentials(format!(
                    "{} is not an absolute URL: {:?}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// URL the user's browser is sent to
    pub fn authorization_url(&self) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.authorization_endpoint).map_err(|e| {
            AuthError::MissingCredentials(format!("authUrl is not an absolute URL: {}", e))
        })?;

        url.query_pairs_mut()
            .append_pair("access_type", "offline")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &self.state_token);

        Ok(url.to_string())
    }
}

/// Generate a random URL-safe state nonce
fn generate_state_token() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 16];
    for byte in &mut bytes {
        *byte = fastrand::u8(..);
    }
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
