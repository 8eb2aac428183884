//! PKCE (Proof Key for Code Exchange) parameters per RFC 7636
//!
//! One `PkceParams` value lives for exactly one authorization attempt. The
//! verifier stays in process memory and is only ever sent to the token
//! endpoint; the authorization URL carries the S256 challenge.

use std::net::TcpListener;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::AuthConfig;
use crate::error::FlowError;

/// Bytes of entropy in `state` and `verifier`.
const RANDOM_BYTES: usize = 32;

/// Per-attempt authorization parameters.
#[derive(Debug)]
pub struct PkceParams {
    /// Loopback port the callback server will listen on.
    pub port: u16,
    /// CSRF nonce echoed back by the authorization server.
    pub state: String,
    pub verifier: Secret<String>,
    pub challenge: String,
}

impl PkceParams {
    /// Pick a free port on `host` and generate fresh `state` and `verifier`.
    pub fn generate(host: &str) -> Result<Self, FlowError> {
        let port = free_port(host)?;
        let verifier = random_token();
        let challenge = compute_challenge(&verifier);
        Ok(Self {
            port,
            state: random_token(),
            verifier: Secret::new(verifier),
            challenge,
        })
    }

    pub fn redirect_uri(&self, host: &str) -> String {
        format!("http://{host}:{}/callback", self.port)
    }
}

/// 256 random bits, base64url without padding (43 characters).
pub fn random_token() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Ask the OS for an unused port, then release it for the callback server.
pub fn free_port(host: &str) -> Result<u16, FlowError> {
    let listener = TcpListener::bind((host, 0))
        .map_err(|e| FlowError::Params(format!("binding {host}:0: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| FlowError::Params(format!("reading bound address: {e}")))?
        .port();
    Ok(port)
}

/// Build the authorization URL for the browser.
pub fn authorization_url(
    config: &AuthConfig,
    params: &PkceParams,
    redirect_uri: &str,
) -> Result<String, FlowError> {
    let mut url = Url::parse(&config.auth_url)
        .map_err(|e| FlowError::Params(format!("invalid auth url: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code");
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(" "));
        }
        query
            .append_pair("state", &params.state)
            .append_pair("access_type", "offline")
            .append_pair("code_challenge", &params.challenge)
            .append_pair("code_challenge_method", "S256");
    }
    Ok(url.into())
}
