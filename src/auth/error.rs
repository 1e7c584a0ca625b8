//! Sign-in error type definitions

use std::fmt;

use axum::http::StatusCode;

/// Failure category, one per step of the sign-in lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingCredentials,
    BrowserLaunchFailed,
    ListenerBindFailed,
    AuthorizationDenied,
    MissingCode,
    StateMismatch,
    TokenExchangeFailed,
    TokenPersistFailed,
    NoToken,
    CorruptToken,
    FlowTimedOut,
    FlowCancelled,
}

/// Sign-in and token store errors
///
/// Every variant is terminal for the current attempt; nothing is retried.
#[derive(Debug)]
pub enum AuthError {
    /// Client ID, secret, scopes or an endpoint is not configured
    MissingCredentials(String),

    BrowserLaunchFailed(String),

    /// Callback port could not be bound (usually already in use)
    ListenerBindFailed { addr: String, reason: String },

    /// Provider redirected back with `error=...`
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    MissingCode,

    /// Returned `state` is absent or differs from the nonce that was sent
    StateMismatch,

    TokenExchangeFailed(String),

    /// Exchange succeeded but the token could not be written
    TokenPersistFailed(String),

    NoToken { path: String },

    CorruptToken { path: String, reason: String },

    FlowTimedOut { waited_secs: u64 },

    FlowCancelled,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingCredentials(msg) => write!(f, "Missing client credentials: {}", msg),
            AuthError::BrowserLaunchFailed(msg) => write!(f, "Failed to open browser: {}", msg),
            AuthError::ListenerBindFailed { addr, reason } => {
                write!(f, "Failed to start callback listener on {}: {}", addr, reason)
            }
            AuthError::AuthorizationDenied { error, description } => match description {
                Some(desc) => write!(f, "Authorization denied: {} ({})", error, desc),
                None => write!(f, "Authorization denied: {}", error),
            },
            AuthError::MissingCode => write!(f, "Authorization code not found in the callback request"),
            AuthError::StateMismatch => {
                write!(f, "Callback state does not match this sign-in attempt")
            }
            AuthError::TokenExchangeFailed(msg) => write!(f, "Failed to exchange token: {}", msg),
            AuthError::TokenPersistFailed(msg) => write!(f, "Failed to save token: {}", msg),
            AuthError::NoToken { path } => write!(f, "No token found at {}", path),
            AuthError::CorruptToken { path, reason } => {
                write!(f, "Token file {} is unreadable: {}", path, reason)
            }
            AuthError::FlowTimedOut { waited_secs } => {
                write!(f, "No authorization callback received within {}s", waited_secs)
            }
            AuthError::FlowCancelled => write!(f, "Sign-in was cancelled"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::MissingCredentials(_) => ErrorKind::MissingCredentials,
            AuthError::BrowserLaunchFailed(_) => ErrorKind::BrowserLaunchFailed,
            AuthError::ListenerBindFailed { .. } => ErrorKind::ListenerBindFailed,
            AuthError::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            AuthError::MissingCode => ErrorKind::MissingCode,
            AuthError::StateMismatch => ErrorKind::StateMismatch,
            AuthError::TokenExchangeFailed(_) => ErrorKind::TokenExchangeFailed,
            AuthError::TokenPersistFailed(_) => ErrorKind::TokenPersistFailed,
            AuthError::NoToken { .. } => ErrorKind::NoToken,
            AuthError::CorruptToken { .. } => ErrorKind::CorruptToken,
            AuthError::FlowTimedOut { .. } => ErrorKind::FlowTimedOut,
            AuthError::FlowCancelled => ErrorKind::FlowCancelled,
        }
    }

    /// Status returned to the browser when this error ends a callback
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::AuthorizationDenied { .. }
            | AuthError::MissingCode
            | AuthError::StateMismatch => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Suggested next step for the user
    pub fn remedy(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials(_) => {
                "Run 'drivebox auth setup' to provide your client credentials."
            }
            AuthError::ListenerBindFailed { .. } => {
                "Make sure no other sign-in is running and the callback port is free, then run 'drivebox auth in' again."
            }
            AuthError::NoToken { .. } | AuthError::CorruptToken { .. } => {
                "Please run 'drivebox auth in' to authenticate."
            }
            AuthError::TokenExchangeFailed(_) => {
                "Check your credential setup with 'drivebox auth setup', then run 'drivebox auth in' again."
            }
            _ => "Run 'drivebox auth in' to try again.",
        }
    }
}
