//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client secret is loaded from SMARTPC_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly to avoid leaking
//! secrets.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use command_channel::ChannelConfig;
use common::Secret;
use serde::Deserialize;
use smartpc_auth::{AuthConfig, CallbackConfig};
use transport::{LastWill, Qos};

pub const CLIENT_SECRET_ENV: &str = "SMARTPC_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub oauth: OAuthSection,
    #[serde(default)]
    pub callback: CallbackSection,
    pub channel: ChannelSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Authorization server settings
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to
    /// SMARTPC_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Launch the system browser; when false the URL is only logged.
    #[serde(default = "default_true")]
    pub open_browser: bool,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Loopback redirect listener
#[derive(Debug, Deserialize)]
pub struct CallbackSection {
    #[serde(default = "default_callback_host")]
    pub host: String,
    #[serde(default = "default_callback_ttl")]
    pub ttl_secs: u64,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            host: default_callback_host(),
            ttl_secs: default_callback_ttl(),
        }
    }
}

/// Broker connection and command routing
#[derive(Debug, Deserialize)]
pub struct ChannelSection {
    pub broker_url: String,
    /// Defaults to a random id per process.
    #[serde(default)]
    pub client_id: Option<String>,
    pub command_topic: String,
    pub message_type: String,
    pub log_topic: String,
    pub log_message_type: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub will: Option<WillSection>,
}

/// Message the broker publishes for us if the connection drops
#[derive(Debug, Deserialize)]
pub struct WillSection {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub retained: bool,
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    pub token_path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsSection {
    /// Serve `/metrics` here when set.
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".into(), "offline".into()]
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    30
}

fn default_callback_host() -> String {
    "127.0.0.1".into()
}

fn default_callback_ttl() -> u64 {
    300
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_stop_grace() -> u64 {
    2
}

fn default_connect_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. SMARTPC_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Some(e) = common::Error::aggregate(config.problems()) {
            return Err(e);
        }

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.oauth.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oauth.client_secret = Some(Secret::new(secret));
            }
        }

        if config
            .channel
            .client_id
            .as_deref()
            .is_none_or(|id| id.trim().is_empty())
        {
            config.channel.client_id = Some(format!("smartpc-{}", uuid::Uuid::new_v4().as_simple()));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("smartpc-agent.toml")
    }

    /// Values the library crates cannot check themselves.
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let urls = [
            ("auth_url", &self.oauth.auth_url),
            ("token_url", &self.oauth.token_url),
            ("user_info_url", &self.oauth.user_info_url),
        ];
        for (name, value) in urls {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                problems.push(format!(
                    "{name} must start with http:// or https://, got: {value}"
                ));
            }
        }
        if !self.channel.broker_url.starts_with("ws://")
            && !self.channel.broker_url.starts_with("wss://")
        {
            problems.push(format!(
                "broker_url must start with ws:// or wss://, got: {}",
                self.channel.broker_url
            ));
        }
        if self.oauth.http_timeout_secs == 0 {
            problems.push("http_timeout_secs must be greater than 0".into());
        }
        if self.callback.ttl_secs == 0 {
            problems.push("callback ttl_secs must be greater than 0".into());
        }
        if self.channel.connect_timeout_secs == 0 {
            problems.push("connect_timeout_secs must be greater than 0".into());
        }
        problems
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            client_id: self.oauth.client_id.clone(),
            client_secret: self.oauth.client_secret.clone(),
            auth_url: self.oauth.auth_url.clone(),
            token_url: self.oauth.token_url.clone(),
            scopes: self.oauth.scopes.clone(),
            callback: CallbackConfig {
                host: self.callback.host.clone(),
                ttl: Duration::from_secs(self.callback.ttl_secs),
            },
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let channel = &self.channel;
        ChannelConfig {
            client_id: channel.client_id.clone().unwrap_or_default(),
            command_topic: channel.command_topic.clone(),
            message_type: channel.message_type.clone(),
            log_topic: channel.log_topic.clone(),
            log_message_type: channel.log_message_type.clone(),
            reconnect_delay: Duration::from_secs(channel.reconnect_delay_secs),
            reconnect_attempts: channel.reconnect_attempts,
            stop_grace: Duration::from_secs(channel.stop_grace_secs),
            will: channel.will.as_ref().map(|will| LastWill {
                topic: will.topic.clone(),
                payload: will.payload.clone().into_bytes(),
                qos: Qos::AtLeastOnce,
                retained: will.retained,
            }),
        }
    }
}
