//! Token ownership with serialized refresh
//!
//! `TokenStore` holds the one current token behind a tokio `Mutex`. Every
//! read goes through the lock, and an invalid token is refreshed while the
//! lock is held, so at most one refresh runs at a time and concurrent callers
//! all see the same replacement. `try_token` gives up immediately with
//! `Error::TokenLocked` instead of queueing behind a refresh.
//!
//! Persistence is injected: a `TokenLoader` for `load_existing` and an
//! optional `TokenSaver` called after every token change.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::BrowserLauncher;
use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::flow;
use crate::token::{self, Token};

/// Source of a previously saved token.
pub trait TokenLoader: Send + Sync {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>>;
}

/// Sink for every newly issued token.
///
/// Save errors are logged and never fail the operation that produced the token.
pub trait TokenSaver: Send + Sync {
    fn save<'a>(&'a self, token: &'a Token) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

pub struct TokenStore {
    config: AuthConfig,
    client: reqwest::Client,
    loader: Option<Arc<dyn TokenLoader>>,
    saver: Option<Arc<dyn TokenSaver>>,
    token: Mutex<Option<Token>>,
}

impl TokenStore {
    /// Create an empty store. Fails if `config` is incomplete.
    pub fn new(config: AuthConfig, client: reqwest::Client) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client,
            loader: None,
            saver: None,
            token: Mutex::new(None),
        })
    }

    pub fn with_loader(mut self, loader: Arc<dyn TokenLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_saver(mut self, saver: Arc<dyn TokenSaver>) -> Self {
        self.saver = Some(saver);
        self
    }

    /// Start from a token obtained elsewhere.
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Mutex::new(Some(token));
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Run the browser flow and install the resulting token.
    pub async fn acquire_new(
        &self,
        launcher: &dyn BrowserLauncher,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let token = flow::authorize(&self.client, &self.config, launcher, cancel).await?;
        self.save_if_configured(&token).await;
        *self.token.lock().await = Some(token);
        info!("token acquired via browser authorization");
        Ok(())
    }

    /// Install the token from the configured loader, refreshing it first if
    /// it is no longer valid.
    pub async fn load_existing(&self) -> Result<()> {
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| Error::Config(vec!["missing token loader".into()]))?;
        let loaded = loader.load().await?;

        let token = if loaded.is_valid() {
            loaded
        } else {
            debug!("stored token is expired, refreshing before use");
            self.refresh(&loaded).await?
        };

        *self.token.lock().await = Some(token);
        info!("token loaded from storage");
        Ok(())
    }

    /// Return a valid access token, waiting for the lock and refreshing if
    /// needed.
    pub async fn token(&self) -> Result<Secret<String>> {
        let mut slot = self.token.lock().await;
        self.valid_access(&mut slot).await
    }

    /// Like `token`, but fails with `Error::TokenLocked` instead of waiting.
    pub async fn try_token(&self) -> Result<Secret<String>> {
        let mut slot = self.token.try_lock().map_err(|_| Error::TokenLocked)?;
        self.valid_access(&mut slot).await
    }

    /// Copy of the current token, without validity checks.
    pub async fn current(&self) -> Option<Token> {
        self.token.lock().await.clone()
    }

    async fn valid_access(&self, slot: &mut Option<Token>) -> Result<Secret<String>> {
        let current = slot.as_ref().ok_or(Error::NoToken)?;
        if current.is_valid() {
            return Ok(Secret::new(current.access_token.clone()));
        }

        let refreshed = self.refresh(current).await?;
        let access = Secret::new(refreshed.access_token.clone());
        *slot = Some(refreshed);
        Ok(access)
    }

    /// Refresh grant plus persistence. On failure nothing is replaced.
    async fn refresh(&self, current: &Token) -> Result<Token> {
        match token::refresh_token(&self.client, &self.config, current).await {
            Ok(refreshed) => {
                record_refresh("success");
                self.save_if_configured(&refreshed).await;
                info!("token refreshed");
                Ok(refreshed)
            }
            Err(e) => {
                record_refresh("failure");
                warn!(error = %e, "token refresh failed");
                Err(e)
            }
        }
    }

    async fn save_if_configured(&self, token: &Token) {
        let Some(saver) = &self.saver else {
            return;
        };
        // The token is still usable in memory even if it could not be saved.
        if let Err(e) = saver.save(token).await {
            warn!(error = %e, "failed to persist token");
        }
    }
}

fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_token_refreshes_total", "outcome" => outcome).increment(1);
}
