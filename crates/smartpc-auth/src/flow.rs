//! Browser-based authorization code flow with PKCE
//!
//! 1. Generate `PkceParams` (free port, state, verifier, challenge)
//! 2. Start the callback server on that port
//! 3. Open the authorization URL in the browser
//! 4. Wait for the callback, bounded by the configured TTL
//! 5. Shut the callback server down, whatever happened
//! 6. Exchange the code using the verifier

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::BrowserLauncher;
use crate::callback::CallbackServer;
use crate::config::AuthConfig;
use crate::error::FlowError;
use crate::pkce::{PkceParams, authorization_url};
use crate::token::{Token, exchange_code};

/// Run one complete authorization attempt and return the issued token.
pub async fn authorize(
    client: &reqwest::Client,
    config: &AuthConfig,
    launcher: &dyn BrowserLauncher,
    cancel: &CancellationToken,
) -> Result<Token, FlowError> {
    let host = config.callback.host.as_str();
    let params = PkceParams::generate(host)?;
    let redirect_uri = params.redirect_uri(host);
    let url = authorization_url(config, &params, &redirect_uri)?;

    let mut server = CallbackServer::start(host, params.port, &params.state).await?;
    debug!(%redirect_uri, "waiting for authorization callback");

    let waited = match launcher.open(&url) {
        Ok(()) => server.wait(config.callback.ttl, cancel).await,
        Err(e) => Err(e),
    };
    server.shutdown().await;

    let code = waited.inspect_err(|e| warn!(error = %e, "authorization attempt failed"))?;

    let token = exchange_code(
        client,
        config,
        &code,
        params.verifier.expose(),
        &redirect_uri,
    )
    .await
    .map_err(|e| FlowError::Exchange(e.to_string()))?;

    info!("authorization code exchanged for token");
    Ok(token)
}
