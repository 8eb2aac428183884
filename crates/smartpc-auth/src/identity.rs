//! Authenticated subject lookup
//!
//! The subject from the user-info endpoint namespaces every broker topic.
//! It is fetched once and cached for the life of the resolver; a token
//! refresh does not invalidate it. Call `invalidate` to force a re-fetch.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::TokenStore;

/// Profile returned by the user-info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub auth_time: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub rat: i64,
    #[serde(default)]
    pub traits: UserTraits,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserTraits {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: UserName,
    #[serde(default)]
    pub picture: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserName {
    #[serde(default)]
    pub first: String,
    #[serde(default)]
    pub last: String,
}

pub struct IdentityResolver {
    store: Arc<TokenStore>,
    url: String,
    cached: RwLock<Option<UserInfo>>,
}

impl IdentityResolver {
    pub fn new(store: Arc<TokenStore>, user_info_url: impl Into<String>) -> Result<Self> {
        let url = user_info_url.into();
        if url.trim().is_empty() {
            return Err(Error::Config(vec!["missing user info url".into()]));
        }
        Ok(Self {
            store,
            url,
            cached: RwLock::new(None),
        })
    }

    /// Cached user info, fetching it on first use.
    pub async fn user_info(&self) -> Result<UserInfo> {
        if let Some(info) = self.cached.read().await.as_ref() {
            return Ok(info.clone());
        }

        let mut cached = self.cached.write().await;
        // Another caller may have filled the cache while we waited.
        if let Some(info) = cached.as_ref() {
            return Ok(info.clone());
        }

        let info = self.fetch().await?;
        info!(subject = %info.sub, "resolved user identity");
        *cached = Some(info.clone());
        Ok(info)
    }

    pub async fn subject(&self) -> Result<String> {
        Ok(self.user_info().await?.sub)
    }

    /// Drop the cached identity so the next call re-fetches it.
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
        debug!("identity cache invalidated");
    }

    async fn fetch(&self) -> Result<UserInfo> {
        let access = self.store.token().await?;
        let response = self
            .store
            .http_client()
            .get(&self.url)
            .bearer_auth(access.expose())
            .send()
            .await
            .map_err(|e| Error::Http(format!("user info request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::UserInfo(format!("user info returned {status}: {body}")));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| Error::UserInfo(format!("invalid user info response: {e}")))?;
        if info.sub.is_empty() {
            return Err(Error::UserInfo("user info has no subject".into()));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::token::Token;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(server: &MockServer) -> IdentityResolver {
        let store = TokenStore::new(test_config(&server.uri()), reqwest::Client::new())
            .unwrap()
            .with_token(Token {
                access_token: "at_identity".into(),
                refresh_token: None,
                expires: None,
            });
        IdentityResolver::new(Arc::new(store), format!("{}/userinfo", server.uri())).unwrap()
    }

    fn profile() -> serde_json::Value {
        serde_json::json!({
            "auth_time": 1700000000,
            "iat": 1700000001,
            "rat": 1700000002,
            "sub": "u123",
            "traits": {
                "email": "ops@example.com",
                "name": { "first": "Ada", "last": "Lovelace" },
                "picture": "https://example.com/a.png"
            }
        })
    }

    #[tokio::test]
    async fn fetches_once_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at_identity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile()))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver(&server);
        let info = resolver.user_info().await.unwrap();
        assert_eq!(info.sub, "u123");
        assert_eq!(info.traits.name.first, "Ada");
        assert_eq!(info.traits.email, "ops@example.com");
        assert_eq!(resolver.subject().await.unwrap(), "u123");
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile()))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = resolver(&server);
        resolver.subject().await.unwrap();
        resolver.invalidate().await;
        resolver.subject().await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = resolver(&server);
        assert!(matches!(resolver.subject().await, Err(Error::UserInfo(_))));
        assert!(resolver.subject().await.is_err());
    }

    #[tokio::test]
    async fn missing_subject_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = resolver(&server).user_info().await.unwrap_err();
        assert!(matches!(err, Error::UserInfo(_)), "got {err:?}");
    }

    #[test]
    fn empty_url_is_a_config_error() {
        let store = TokenStore::new(test_config("https://auth.example"), reqwest::Client::new())
            .unwrap();
        let result = IdentityResolver::new(Arc::new(store), "");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
