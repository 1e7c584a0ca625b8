//! Sign-in state machine
//!
//! `Idle → Listening → Received → Exchanging → Persisted → ShuttingDown → Done`,
//! with `Errored` reachable from every step. The callback listener is owned by
//! a single `run` call and is shut down on every exit path before it returns.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use super::browser::BrowserLauncher;
use super::callback::{AuthorizationCallback, CallbackListener, CallbackReply, PendingCallback};
use super::credentials::{CredentialSource, mask};
use super::error::AuthError;
use super::exchange::TokenExchanger;
use super::request::AuthorizationRequest;
use super::token::{Token, TokenStore};
use crate::model::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Listening,
    Received,
    Exchanging,
    Persisted,
    ShuttingDown,
    Done,
    Errored,
}

/// Listener and timing parameters for one attempt
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub callback_host: String,
    pub callback_port: u16,
    pub callback_path: String,
    pub callback_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            callback_host: config.callback_host.clone(),
            callback_port: config.callback_port,
            callback_path: config.callback_path.clone(),
            callback_timeout: config.callback_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Local authorization-code sign-in
pub struct SignInFlow {
    config: Config,
    settings: FlowSettings,
    credentials: Arc<dyn CredentialSource>,
    browser: Arc<dyn BrowserLauncher>,
    exchanger: TokenExchanger,
    store: Arc<dyn TokenStore>,
    history: Mutex<Vec<FlowState>>,
}

impl SignInFlow {
    pub fn new(
        config: Config,
        credentials: Arc<dyn CredentialSource>,
        browser: Arc<dyn BrowserLauncher>,
        exchanger: TokenExchanger,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let settings = FlowSettings::from_config(&config);
        Self {
            config,
            settings,
            credentials,
            browser,
            exchanger,
            store,
            history: Mutex::new(vec![FlowState::Idle]),
        }
    }

    #[cfg(test)]
    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current state
    pub fn state(&self) -> FlowState {
        self.history.lock().last().copied().unwrap_or(FlowState::Idle)
    }

    /// Every state visited by the last run, in order
    #[cfg(test)]
    pub fn history(&self) -> Vec<FlowState> {
        self.history.lock().clone()
    }

    fn transition(&self, next: FlowState) {
        let mut history = self.history.lock();
        let previous = history.last().copied().unwrap_or(FlowState::Idle);
        tracing::debug!("Sign-in state {:?} -> {:?}", previous, next);
        history.push(next);
    }

    /// Run one sign-in attempt to completion
    ///
    /// On success the token has already been written to the token store.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        *self.history.lock() = vec![FlowState::Idle];

        let result = self.run_inner(cancel).await;
        match &result {
            Ok(_) => {
                self.transition(FlowState::Done);
                tracing::info!("Authentication successful");
            }
            Err(e) => {
                self.transition(FlowState::Errored);
                tracing::debug!("Sign-in failed ({:?}): {}", e.kind(), e);
            }
        }
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<Token, AuthError> {
        let request = AuthorizationRequest::new(self.credentials.as_ref(), &self.config)?;
        let auth_url = request.authorization_url()?;
        tracing::debug!("Authorization request for client {}", mask(&request.client_id));

        let mut listener = CallbackListener::bind(
            &self.settings.callback_host,
            self.settings.callback_port,
            &self.settings.callback_path,
        )
        .await?;
        self.transition(FlowState::Listening);
        tracing::debug!("Waiting for the authorization callback on {}", listener.local_addr());

        let result = self.drive(&request, &auth_url, &mut listener, cancel).await;

        if result.is_ok() {
            self.transition(FlowState::ShuttingDown);
        }
        listener.shutdown(self.settings.shutdown_grace).await;
        result
    }

    async fn drive(
        &self,
        request: &AuthorizationRequest,
        auth_url: &str,
        listener: &mut CallbackListener,
        cancel: &CancellationToken,
    ) -> Result<Token, AuthError> {
        println!("Opening your browser to sign in. If it does not open, visit:\n{}", auth_url);
        let browser = self.browser.clone();
        let url = auth_url.to_string();
        tokio::task::spawn_blocking(move || browser.open(&url))
            .await
            .map_err(|e| AuthError::BrowserLaunchFailed(e.to_string()))?
            .map_err(AuthError::BrowserLaunchFailed)?;

        let pending = listener
            .next_callback(self.settings.callback_timeout, cancel)
            .await?;
        self.transition(FlowState::Received);

        let code = match validate_callback(&pending.params, &request.state_token) {
            Ok(code) => code,
            Err(e) => return Err(reject(pending, e)),
        };

        self.transition(FlowState::Exchanging);
        let exchanged = tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::FlowCancelled),
            result = self.exchanger.exchange(request, &code) => result,
        };
        let token = match exchanged {
            Ok(token) => token,
            Err(e) => return Err(reject(pending, e)),
        };

        if let Err(e) = self.persist(&token).await {
            return Err(reject(pending, e));
        }
        self.transition(FlowState::Persisted);

        pending.respond(CallbackReply::success());
        Ok(token)
    }

    async fn persist(&self, token: &Token) -> Result<(), AuthError> {
        let store = self.store.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || store.write(&token))
            .await
            .map_err(|e| AuthError::TokenPersistFailed(e.to_string()))?
    }
}

/// Answer the browser with the failure and hand the error back
fn reject(pending: PendingCallback, error: AuthError) -> AuthError {
    pending.respond(CallbackReply::failure(&error));
    error
}

/// Accept the callback only if it carries a code and the state that was sent
fn validate_callback(params: &AuthorizationCallback, expected_state: &str) -> Result<String, AuthError> {
    if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
        return Err(AuthError::AuthorizationDenied {
            error: error.to_string(),
            description: params.error_description.clone(),
        });
    }

    let code = params
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingCode)?;

    let state = params.state.as_deref().ok_or(AuthError::StateMismatch)?;
    if !bool::from(state.as_bytes().ct_eq(expected_state.as_bytes())) {
        return Err(AuthError::StateMismatch);
    }

    Ok(code.to_string())
}
