//! Error types for authorization and token management

use std::time::Duration;

/// Why one browser authorization attempt failed.
///
/// Any of these aborts the attempt; no partial token is installed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("failed to prepare authorization parameters: {0}")]
    Params(String),

    #[error("failed to open browser: {0}")]
    Browser(String),

    #[error("callback server failed: {0}")]
    CallbackServer(String),

    #[error("callback state did not match")]
    InvalidState,

    #[error("callback carried no authorization code")]
    MissingCode,

    #[error("authorization server returned an error: {0}")]
    Denied(String),

    #[error("no callback received within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("authorization cancelled")]
    Cancelled,

    #[error("code exchange failed: {0}")]
    Exchange(String),
}

/// Errors from token acquisition, refresh, persistence and identity lookup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid auth configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("no token has been acquired")]
    NoToken,

    #[error("token is locked by another caller")]
    TokenLocked,

    #[error("authorization flow failed: {0}")]
    Flow(#[from] FlowError),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("user info request failed: {0}")]
    UserInfo(String),

    #[error("token parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
