//! Where the channel gets its broker credentials
//!
//! Asked again on every connect attempt, so a refreshed token is always
//! the one handed to the broker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use smartpc_auth::{IdentityResolver, TokenStore};

use crate::error::{Error, Result};

pub trait CredentialSource: Send + Sync {
    /// A currently valid access token, used as the connect password.
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>>;

    /// The subject that namespaces every topic.
    fn subject(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// Credentials from the token store and identity resolver.
pub struct AuthCredentials {
    store: Arc<TokenStore>,
    identity: Arc<IdentityResolver>,
}

impl AuthCredentials {
    pub fn new(store: Arc<TokenStore>, identity: Arc<IdentityResolver>) -> Self {
        Self { store, identity }
    }
}

impl CredentialSource for AuthCredentials {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            self.store
                .token()
                .await
                .map_err(|e| Error::Credentials(e.to_string()))
        })
    }

    fn subject(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            self.identity
                .subject()
                .await
                .map_err(|e| Error::Credentials(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartpc_auth::{AuthConfig, CallbackConfig, Token};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str) -> AuthConfig {
        AuthConfig {
            client_id: "smartpc-agent".into(),
            client_secret: None,
            auth_url: format!("{base}/oauth2/auth"),
            token_url: format!("{base}/oauth2/token"),
            scopes: vec!["openid".into()],
            callback: CallbackConfig {
                host: "127.0.0.1".into(),
                ttl: Duration::from_secs(5),
            },
        }
    }

    #[tokio::test]
    async fn reads_token_and_subject_from_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "u123"
            })))
            .mount(&server)
            .await;

        let store = TokenStore::new(config(&server.uri()), reqwest::Client::new())
            .unwrap()
            .with_token(Token {
                access_token: "at-1".into(),
                refresh_token: None,
                expires: None,
            });
        let store = Arc::new(store);
        let identity =
            Arc::new(IdentityResolver::new(store.clone(), format!("{}/userinfo", server.uri())).unwrap());
        let creds = AuthCredentials::new(store, identity);

        assert_eq!(creds.access_token().await.unwrap().expose(), "at-1");
        assert_eq!(creds.subject().await.unwrap(), "u123");
    }

    #[tokio::test]
    async fn missing_token_is_a_credentials_error() {
        let store = Arc::new(
            TokenStore::new(config("http://127.0.0.1:9"), reqwest::Client::new()).unwrap(),
        );
        let identity = Arc::new(IdentityResolver::new(store.clone(), "http://127.0.0.1:9/userinfo").unwrap());
        let creds = AuthCredentials::new(store, identity);

        let err = creds.access_token().await.unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
    }
}
