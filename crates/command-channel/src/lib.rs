//! Resilient command channel for the smart-PC agent
//!
//! Subscribes to a per-user command topic on the broker, hands each
//! delivery to a registered handler and publishes an acknowledgment to the
//! per-user log topic:
//!
//! 1. `ChannelManager::run` validates its config and fetches a fresh token
//!    and subject from a `CredentialSource`
//! 2. Every topic is scoped to `users/<subject>/` by `ScopedClient`
//! 3. Deliveries go through the `Dispatcher`, which yields one `LogMessage`
//!    per accepted command
//! 4. Expected closures reconnect immediately; hard failures retry within
//!    the configured budget

pub mod ack;
pub mod credentials;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod manager;
mod metrics;
pub mod scoped;
pub mod state;
pub mod topic;

#[cfg(test)]
mod testing;

pub use ack::{AckCode, LogData, LogMessage};
pub use credentials::{AuthCredentials, CredentialSource};
pub use dispatcher::{
    CommandContext, CommandError, Dispatcher, Handler, HandlerError, handler_fn,
};
pub use envelope::{CommandData, CommandEnvelope};
pub use error::{Error, Result};
pub use manager::{ChannelConfig, ChannelManager};
pub use scoped::ScopedClient;
pub use topic::TopicNamespace;
