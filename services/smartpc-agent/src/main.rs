//! Smart-PC agent
//!
//! Single-binary service that:
//! 1. Restores its OAuth token from disk, or runs the browser PKCE flow
//! 2. Resolves the signed-in subject from the user-info endpoint
//! 3. Subscribes to `users/<subject>/<command_topic>` on the broker bridge
//! 4. Runs commands and publishes acknowledgments until SIGINT/SIGTERM

mod config;
mod handlers;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use command_channel::{AuthCredentials, ChannelManager};
use smartpc_auth::{
    BrowserLauncher, FileTokenStore, IdentityResolver, PrintUrl, SystemBrowser, TokenStore,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::WsTransport;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting smartpc-agent");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        broker_url = %config.channel.broker_url,
        command_topic = %config.channel.command_topic,
        token_path = %config.storage.token_path.display(),
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    if let Some(addr) = config.metrics.listen_addr {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener to {addr}"))?;
        let app = metrics::router(prometheus_handle);
        let server_cancel = cancel.clone();
        info!(addr = %addr, "serving metrics");
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "metrics server failed");
            }
        });
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.oauth.http_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let token_file = Arc::new(FileTokenStore::new(config.storage.token_path.clone()));
    let store = TokenStore::new(config.auth_config(), http)
        .context("invalid OAuth configuration")?
        .with_loader(token_file.clone())
        .with_saver(token_file);

    if let Err(e) = store.load_existing().await {
        info!(error = %e, "no usable stored token, starting browser authorization");
        let launcher: Box<dyn BrowserLauncher> = if config.oauth.open_browser {
            Box::new(SystemBrowser)
        } else {
            Box::new(PrintUrl)
        };
        store
            .acquire_new(launcher.as_ref(), &cancel)
            .await
            .context("authorization failed")?;
    }

    let store = Arc::new(store);
    let identity = Arc::new(
        IdentityResolver::new(store.clone(), config.oauth.user_info_url.clone())
            .context("invalid user info configuration")?,
    );
    let user = identity
        .user_info()
        .await
        .context("failed to resolve user identity")?;
    info!(subject = %user.sub, email = %user.traits.email, "signed in");

    let transport = WsTransport::new(
        config.channel.broker_url.clone(),
        Duration::from_secs(config.channel.connect_timeout_secs),
    );
    let credentials = Arc::new(AuthCredentials::new(store, identity));
    let mut channel = ChannelManager::new(config.channel_config(), Box::new(transport), credentials);
    handlers::register(&mut channel);

    let outcome = channel.run(&cancel).await;
    channel.stop().await;

    match outcome {
        Err(command_channel::Error::Cancelled) | Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "command channel stopped");
            cancel.cancel();
            Err(e).context("command channel failed")
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
