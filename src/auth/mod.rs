//! Google Drive sign-in
//!
//! Local OAuth2 authorization-code flow:
//! - authorization URL with a per-attempt state nonce
//! - one-shot callback listener on localhost
//! - code exchange at the token endpoint
//! - atomic token persistence

pub mod browser;
pub mod callback;
pub mod credentials;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod request;
pub mod token;

pub use browser::SystemBrowser;
pub use credentials::EnvCredentials;
pub use error::AuthError;
pub use exchange::TokenExchanger;
pub use flow::SignInFlow;
pub use token::{FileTokenStore, TokenStore};
