//! Pub/sub transport abstraction for the command channel
//!
//! Defines the `Transport` trait the channel manager drives: connect with a
//! credential, subscribe, publish, receive, disconnect. The framing and QoS
//! engine behind it is the implementation's business. `WsTransport` speaks a
//! JSON bridge protocol over a WebSocket; tests substitute scripted fakes.
//!
//! Errors carry a closure classification (`TransportError::is_expected_closure`)
//! so the reconnect policy can tell a dropped connection from a real failure.

pub mod error;
pub mod ws;

pub use error::{CloseKind, Result, TransportError};
pub use ws::WsTransport;

use common::Secret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Delivery guarantee requested for a subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(format!("invalid qos level {other}")),
        }
    }
}

/// Message the broker publishes on our behalf if the connection dies
/// without a clean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retained: bool,
}

/// Everything needed to open one authenticated session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub client_id: String,
    /// Authenticated subject identifier.
    pub username: String,
    /// Current access token.
    pub password: Secret<String>,
    pub will: Option<LastWill>,
}

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retained: bool,
    pub duplicate: bool,
    pub message_id: u16,
}

/// A connection to a pub/sub broker.
///
/// One value owns one connection at a time; `connect` after a failure
/// replaces whatever was there. All topic arguments are final broker topics,
/// scoping happens a layer above.
///
/// Uses `Pin<Box<dyn Future>>` return types so the manager can hold a
/// `Box<dyn Transport>`.
pub trait Transport: Send {
    fn connect(
        &mut self,
        request: ConnectRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn subscribe<'a>(
        &'a mut self,
        topic: &'a str,
        qos: Qos,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn unsubscribe<'a>(
        &'a mut self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Wait for the next inbound message.
    ///
    /// `Ok(None)` means the broker ended the session cleanly.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<InboundMessage>>> + Send + '_>>;

    /// Close the connection, waiting at most `grace` for the broker to
    /// acknowledge. Disconnecting an idle transport is a no-op.
    fn disconnect(&mut self, grace: Duration) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Qos::AtLeastOnce).unwrap(), "1");
        let qos: Qos = serde_json::from_str("2").unwrap();
        assert_eq!(qos, Qos::ExactlyOnce);
    }

    #[test]
    fn qos_rejects_unknown_level() {
        let result: std::result::Result<Qos, _> = serde_json::from_str("3");
        assert!(result.is_err());
    }

    #[test]
    fn connect_request_debug_hides_password() {
        let request = ConnectRequest {
            client_id: "agent-1".into(),
            username: "u123".into(),
            password: Secret::from("at_secret"),
            will: None,
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("at_secret"), "got: {debug}");
        assert!(debug.contains("u123"));
    }
}
