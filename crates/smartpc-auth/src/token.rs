//! Tokens and the two token endpoint grants
//!
//! 1. Authorization code exchange, completing the PKCE flow
//! 2. Refresh, whenever the stored access token is no longer valid
//!
//! Both POST a form to the configured token URL.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Tokens are treated as expired this long before their real expiry.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(10);

/// A credential set issued by the token endpoint.
///
/// `expires` is an absolute unix timestamp in milliseconds; `None` means the
/// server did not say, and the token is valid until rejected.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires: Option<u64>,
}

impl Token {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }

    pub fn is_valid_at(&self, now_millis: u64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires {
            None => true,
            Some(expires) => now_millis.saturating_add(EXPIRY_MARGIN.as_millis() as u64) < expires,
        }
    }

    fn from_response(response: TokenResponse, previous_refresh: Option<&str>) -> Self {
        let expires = response
            .expires_in
            .map(|secs| now_millis().saturating_add(secs.saturating_mul(1000)));
        Token {
            access_token: response.access_token,
            // Servers may omit the refresh token on refresh; keep the old one.
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_owned)),
            expires,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires", &self.expires)
            .finish()
    }
}

/// Raw token endpoint response. `expires_in` is a delta in seconds.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Exchange an authorization code for a token.
///
/// `verifier` is the PKCE verifier generated for this attempt, never the
/// challenge.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &AuthConfig,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Result<Token> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("code_verifier", verifier),
        ("client_id", config.client_id.as_str()),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.expose().as_str()));
    }

    let response = client
        .post(&config.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let parsed = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;
    Ok(Token::from_response(parsed, None))
}

/// Use the refresh grant to replace an invalid token.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &AuthConfig,
    current: &Token,
) -> Result<Token> {
    let refresh = current
        .refresh_token
        .as_deref()
        .ok_or_else(|| Error::InvalidCredentials("token has no refresh token".into()))?;

    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", config.client_id.as_str()),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret.expose().as_str()));
    }

    let response = client
        .post(&config.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 400 invalid_grant, 401 and 403 all mean the refresh token is dead
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    let parsed = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
    Ok(Token::from_response(parsed, Some(refresh)))
}
