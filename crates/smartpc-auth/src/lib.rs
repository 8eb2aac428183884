//! Smart-PC operator authorization
//!
//! OAuth2 authorization code flow with PKCE through a loopback redirect,
//! plus ownership of the resulting token. The crate has no dependency on the
//! agent binary and can be tested on its own.
//!
//! Token flow:
//! 1. `TokenStore::new()` validates the `AuthConfig`
//! 2. `TokenStore::load_existing()` restores a saved token (refreshing it if stale),
//!    or `TokenStore::acquire_new()` runs the browser flow in `flow`
//! 3. Callers ask `TokenStore::token()` for a valid access token; refreshes
//!    happen there, one at a time, and are handed to the `TokenSaver`
//! 4. `IdentityResolver` turns the token into a cached subject identifier

pub mod browser;
pub mod callback;
pub mod config;
pub mod error;
pub mod flow;
pub mod identity;
pub mod persist;
pub mod pkce;
pub mod store;
pub mod token;

pub use browser::{BrowserLauncher, PrintUrl, SystemBrowser};
pub use config::{AuthConfig, CallbackConfig};
pub use error::{Error, FlowError, Result};
pub use identity::{IdentityResolver, UserInfo};
pub use persist::FileTokenStore;
pub use store::{TokenLoader, TokenSaver, TokenStore};
pub use token::Token;
