//! Token endpoint client (authorization_code grant)

use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::error::AuthError;
use super::request::AuthorizationRequest;
use super::token::Token;

/// Upper bound on a believable `expires_in` (one year)
const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 3600;

/// Provider error body (RFC 6749 §5.2)
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Exchanges authorization codes at the token endpoint
#[derive(Clone)]
pub struct TokenExchanger {
    client: Client,
}

impl TokenExchanger {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// POST the code to the token endpoint and parse the token response
    pub async fn exchange(&self, request: &AuthorizationRequest, code: &str) -> Result<Token, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.trim()),
            ("redirect_uri", request.redirect_uri.as_str()),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&request.token_endpoint)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => body.chars().take(240).collect(),
            };
            return Err(AuthError::TokenExchangeFailed(format!(
                "token endpoint returned status {}: {}",
                status.as_u16(),
                detail
            )));
        }

        parse_token_response(&body)
    }
}

fn parse_token_response(body: &str) -> Result<Token, AuthError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| AuthError::TokenExchangeFailed(format!("invalid token response: {}", e)))?;
    let Value::Object(mut fields) = value else {
        return Err(AuthError::TokenExchangeFailed(
            "token response is not a JSON object".to_string(),
        ));
    };

    let access_token = take_string(&mut fields, "access_token")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::TokenExchangeFailed("token response missing access_token".to_string()))?;
    let token_type = take_string(&mut fields, "token_type")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "Bearer".to_string());
    let refresh_token = take_string(&mut fields, "refresh_token").filter(|v| !v.is_empty());

    // Some providers send expires_in as a string.
    let expires_in = fields.remove("expires_in").and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    let expiry = expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| Utc::now() + Duration::seconds(secs.min(MAX_EXPIRES_IN_SECS)));

    Ok(Token {
        access_token,
        token_type,
        refresh_token,
        expiry,
        extra: fields,
    })
}

fn take_string(fields: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}
