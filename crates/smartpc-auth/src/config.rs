//! Authorization settings

use std::time::Duration;

use common::Secret;

use crate::error::{Error, Result};

/// OAuth2 client and endpoint settings for the PKCE flow.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    /// Only sent when the authorization server issued one; public clients
    /// rely on PKCE alone.
    pub client_secret: Option<Secret<String>>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub callback: CallbackConfig,
}

/// Loopback callback listener settings.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Host the redirect URI points at, e.g. `localhost`.
    pub host: String,
    /// How long to wait for the browser to come back.
    pub ttl: Duration,
}

impl AuthConfig {
    /// Check every required field and report all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.client_id.trim().is_empty() {
            problems.push("missing client id".to_string());
        }
        if self.auth_url.trim().is_empty() {
            problems.push("missing auth url".to_string());
        }
        if self.token_url.trim().is_empty() {
            problems.push("missing token url".to_string());
        }
        if self.callback.host.trim().is_empty() {
            problems.push("missing redirect host".to_string());
        }
        if self.callback.ttl.is_zero() {
            problems.push("missing callback server ttl".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems))
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(base: &str) -> AuthConfig {
    AuthConfig {
        client_id: "smartpc-agent".into(),
        client_secret: None,
        auth_url: format!("{base}/oauth2/auth"),
        token_url: format!("{base}/oauth2/token"),
        scopes: vec!["openid".into(), "offline".into()],
        callback: CallbackConfig {
            host: "127.0.0.1".into(),
            ttl: Duration::from_secs(5),
        },
    }
}
