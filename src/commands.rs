//! `drivebox auth` subcommands

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dialoguer::{Confirm, Input, Password};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::auth::credentials::{CLIENT_ID_VAR, CLIENT_SECRET_VAR, CredentialSource, write_env_file};
use crate::auth::error::ErrorKind;
use crate::auth::{
    AuthError, EnvCredentials, FileTokenStore, SignInFlow, SystemBrowser, TokenExchanger, TokenStore,
};
use crate::http_client::build_client;
use crate::model::config::Config;

/// Resolved paths and configuration shared by all subcommands
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
    pub token_path: PathBuf,
    pub env_file: PathBuf,
}

impl CommandContext {
    pub fn new(config: Config, token_override: Option<String>, env_override: Option<String>) -> Self {
        let token_path = PathBuf::from(token_override.unwrap_or_else(|| config.token_path.clone()));
        let env_file = PathBuf::from(env_override.unwrap_or_else(|| config.env_file.clone()));
        Self {
            config,
            token_path,
            env_file,
        }
    }

    fn token_store(&self) -> FileTokenStore {
        FileTokenStore::new(&self.token_path)
    }
}

/// Failure whose message has already been printed for the user
#[derive(Debug)]
pub struct Reported(pub AuthError);

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Reported {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// True when the user has already seen this failure
pub fn is_reported(error: &anyhow::Error) -> bool {
    error.downcast_ref::<Reported>().is_some()
}

/// Print an error and the suggested next step
fn report(error: AuthError) -> anyhow::Error {
    println!("{}", error);
    println!("{}", error.remedy());
    Reported(error).into()
}

/// `drivebox auth in`
pub async fn sign_in(ctx: &CommandContext) -> anyhow::Result<()> {
    println!("Starting authentication process...");

    let credentials = EnvCredentials::load(&ctx.env_file, ctx.config.scopes.clone())?;
    let client = build_client(&ctx.config).context("Failed to build HTTP client")?;
    let flow = SignInFlow::new(
        ctx.config.clone(),
        Arc::new(credentials),
        Arc::new(SystemBrowser),
        TokenExchanger::new(client),
        Arc::new(ctx.token_store()),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling sign-in");
            on_interrupt.cancel();
        }
    });

    let result = flow.run(&cancel).await;
    watcher.abort();
    tracing::debug!("Sign-in finished in state {:?}", flow.state());

    match result {
        Ok(_) => {
            println!(
                "Authentication successful! Token saved to {}.",
                ctx.token_path.display()
            );
            Ok(())
        }
        Err(e) => Err(report(e)),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SignOutOutcome {
    SignedOut,
    NoSession,
}

pub fn sign_out_with(store: &dyn TokenStore) -> Result<SignOutOutcome, AuthError> {
    match store.remove() {
        Ok(()) => Ok(SignOutOutcome::SignedOut),
        Err(e) if e.kind() == ErrorKind::NoToken => Ok(SignOutOutcome::NoSession),
        Err(e) => Err(e),
    }
}

/// `drivebox auth out`
pub fn sign_out(ctx: &CommandContext) -> anyhow::Result<()> {
    let store = ctx.token_store();
    match sign_out_with(&store) {
        Ok(SignOutOutcome::SignedOut) => {
            tracing::info!("Removed token file {}", store.path().display());
            println!("Successfully signed out of session!");
            Ok(())
        }
        Ok(SignOutOutcome::NoSession) => {
            println!("No current session is authenticated. Run 'drivebox auth in' to authenticate.");
            Ok(())
        }
        Err(e) => {
            println!("Error removing token file: {}", e);
            Err(Reported(e).into())
        }
    }
}

#[derive(Debug)]
pub enum SessionStatus {
    Authenticated,
    Expired,
    /// The probe answered with a non-200 status
    NotAuthorized(StatusCode),
    Missing(AuthError),
}

/// Load the stored token and probe `check_url` with it
pub async fn check_session(
    store: &dyn TokenStore,
    client: &Client,
    check_url: &str,
) -> anyhow::Result<SessionStatus> {
    let token = match store.read() {
        Ok(token) => token,
        Err(e) if matches!(e.kind(), ErrorKind::NoToken | ErrorKind::CorruptToken) => {
            return Ok(SessionStatus::Missing(e));
        }
        Err(e) => return Err(e.into()),
    };

    if token.is_expired() {
        return Ok(SessionStatus::Expired);
    }

    let response = client
        .get(check_url)
        .header("Authorization", token.authorization_header())
        .send()
        .await
        .context("Failed to make API request")?;

    let status = response.status();
    tracing::debug!("Session probe returned {}", status);
    if status == StatusCode::OK {
        Ok(SessionStatus::Authenticated)
    } else {
        Ok(SessionStatus::NotAuthorized(status))
    }
}

/// `drivebox auth check`
pub async fn check(ctx: &CommandContext) -> anyhow::Result<()> {
    println!("Checking authentication...");
    let client = build_client(&ctx.config).context("Failed to build HTTP client")?;

    match check_session(&ctx.token_store(), &client, &ctx.config.check_url).await? {
        SessionStatus::Authenticated => println!("Current session is authenticated."),
        SessionStatus::Expired => {
            println!("Current session has expired. Please run 'drivebox auth in' to authenticate.")
        }
        SessionStatus::NotAuthorized(status) => {
            tracing::debug!("Probe status {}", status);
            println!("Current session is not authorized. Please run 'drivebox auth in' to authenticate.");
        }
        SessionStatus::Missing(e) => {
            tracing::debug!("{}", e);
            println!("Failed to load token.");
            println!("{}", e.remedy());
        }
    }
    Ok(())
}

/// `drivebox auth setup`
pub fn setup(ctx: &CommandContext) -> anyhow::Result<()> {
    let existing = EnvCredentials::load(&ctx.env_file, ctx.config.scopes.clone())?;
    if !existing.client_id().is_empty() && !existing.client_secret().is_empty() {
        tracing::info!("Credentials already exist.");
        let change = Confirm::new()
            .with_prompt("Do you want to change these credentials?")
            .default(false)
            .interact()?;
        if !change {
            println!("Exiting setup.");
            return Ok(());
        }
    }

    let client_id: String = Input::new()
        .with_prompt(format!("Enter {}", CLIENT_ID_VAR))
        .interact_text()?;
    let client_secret: String = Password::new()
        .with_prompt(format!("Enter {}", CLIENT_SECRET_VAR))
        .interact()?;

    let path = write_env_file(&ctx.env_file, &client_id, &client_secret)?;
    tracing::info!("Wrote credentials to {}", path.display());
    println!("Setup complete. Check credential validity with 'drivebox auth in'.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::Token;
    use axum::{Router, http::HeaderMap, routing::get};

    fn token(expiry: Option<chrono::DateTime<chrono::Utc>>) -> Token {
        Token {
            access_token: "tok1".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expiry,
            extra: serde_json::Map::new(),
        }
    }

    async fn probe(headers: HeaderMap) -> StatusCode {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer tok1") => StatusCode::OK,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    async fn start_probe() -> String {
        let app = Router::new().route("/files/root", get(probe));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{}/files/root", addr)
    }

    #[test]
    fn test_context_overrides() {
        let ctx = CommandContext::new(Config::default(), Some("/tmp/t.json".to_string()), None);
        assert_eq!(ctx.token_path, PathBuf::from("/tmp/t.json"));
        assert_eq!(ctx.env_file, PathBuf::from(".env"));
    }

    #[test]
    fn test_sign_out_removes_token_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.write(&token(None)).unwrap();

        assert_eq!(sign_out_with(&store).unwrap(), SignOutOutcome::SignedOut);
        assert_eq!(sign_out_with(&store).unwrap(), SignOutOutcome::NoSession);
    }

    #[test]
    fn test_sign_out_failure_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CommandContext::new(
            Config::default(),
            Some(dir.path().display().to_string()),
            None,
        );

        let err = sign_out(&ctx).unwrap_err();
        assert!(is_reported(&err));
        assert!(!is_reported(&anyhow::anyhow!("subcommand required")));
    }

    #[tokio::test]
    async fn test_check_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.write(&token(None)).unwrap();
        let url = start_probe().await;

        let status = check_session(&store, &Client::new(), &url).await.unwrap();
        assert!(matches!(status, SessionStatus::Authenticated));
    }

    #[tokio::test]
    async fn test_check_rejected_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        let mut stale = token(None);
        stale.access_token = "revoked".to_string();
        store.write(&stale).unwrap();
        let url = start_probe().await;

        let status = check_session(&store, &Client::new(), &url).await.unwrap();
        assert!(matches!(status, SessionStatus::NotAuthorized(s) if s == StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_check_expired_token_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store
            .write(&token(Some(chrono::Utc::now() - chrono::Duration::minutes(5))))
            .unwrap();

        let status = check_session(&store, &Client::new(), "http://127.0.0.1:1/unused")
            .await
            .unwrap();
        assert!(matches!(status, SessionStatus::Expired));
    }

    #[tokio::test]
    async fn test_check_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));

        let status = check_session(&store, &Client::new(), "http://127.0.0.1:1/unused")
            .await
            .unwrap();
        assert!(matches!(status, SessionStatus::Missing(AuthError::NoToken { .. })));
    }
}
