//! Transport wrapper that scopes every topic to the connected subject

use std::time::Duration;

use transport::{ConnectRequest, InboundMessage, Qos, Transport, TransportError};

use crate::topic::TopicNamespace;

/// Owns the transport and the namespace of the current session.
///
/// Callers pass logical topic names only; the broker never sees an
/// unscoped topic from this client.
pub struct ScopedClient {
    inner: Box<dyn Transport>,
    namespace: Option<TopicNamespace>,
}

impl ScopedClient {
    pub fn new(inner: Box<dyn Transport>) -> Self {
        Self {
            inner,
            namespace: None,
        }
    }

    pub fn namespace(&self) -> Option<&TopicNamespace> {
        self.namespace.as_ref()
    }

    /// Open a session for `namespace`. The last-will topic in `request` is
    /// logical and gets scoped here.
    pub async fn connect(
        &mut self,
        namespace: TopicNamespace,
        mut request: ConnectRequest,
    ) -> transport::Result<()> {
        if let Some(will) = request.will.as_mut() {
            will.topic = namespace.scope(&will.topic);
        }
        self.namespace = Some(namespace);
        self.inner.connect(request).await
    }

    pub async fn subscribe(&mut self, topic: &str, qos: Qos) -> transport::Result<()> {
        let scoped = self.scoped(topic)?;
        self.inner.subscribe(&scoped, qos).await
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> transport::Result<()> {
        let scoped = self.scoped(topic)?;
        self.inner.unsubscribe(&scoped).await
    }

    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
        retained: bool,
    ) -> transport::Result<()> {
        let scoped = self.scoped(topic)?;
        self.inner.publish(&scoped, payload, qos, retained).await
    }

    pub async fn recv(&mut self) -> transport::Result<Option<InboundMessage>> {
        self.inner.recv().await
    }

    pub async fn disconnect(&mut self, grace: Duration) -> transport::Result<()> {
        self.inner.disconnect(grace).await
    }

    fn scoped(&self, topic: &str) -> transport::Result<String> {
        self.namespace
            .as_ref()
            .map(|ns| ns.scope(topic))
            .ok_or(TransportError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, Session};
    use common::Secret;
    use transport::LastWill;

    fn request(will: Option<LastWill>) -> ConnectRequest {
        ConnectRequest {
            client_id: "agent".into(),
            username: "u123".into(),
            password: Secret::from("at"),
            will,
        }
    }

    #[tokio::test]
    async fn every_operation_is_scoped() {
        let (transport, log) = RecordingTransport::new(vec![Session::hang()]);
        let mut client = ScopedClient::new(Box::new(transport));

        client
            .connect(TopicNamespace::new("u123"), request(None))
            .await
            .unwrap();
        client.subscribe("commands", Qos::AtLeastOnce).await.unwrap();
        client
            .publish("commands", b"{}".to_vec(), Qos::AtLeastOnce, false)
            .await
            .unwrap();
        client.unsubscribe("commands").await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.subscribed, vec!["users/u123/commands"]);
        assert_eq!(log.published[0].0, "users/u123/commands");
        assert_eq!(log.unsubscribed, vec!["users/u123/commands"]);
    }

    #[tokio::test]
    async fn last_will_topic_is_scoped_at_connect() {
        let (transport, log) = RecordingTransport::new(vec![Session::hang()]);
        let mut client = ScopedClient::new(Box::new(transport));
        let will = LastWill {
            topic: "status".into(),
            payload: b"offline".to_vec(),
            qos: Qos::AtLeastOnce,
            retained: true,
        };

        client
            .connect(TopicNamespace::new("u123"), request(Some(will)))
            .await
            .unwrap();

        let log = log.lock().unwrap();
        let will = log.connects[0].will.as_ref().unwrap();
        assert_eq!(will.topic, "users/u123/status");
    }

    #[tokio::test]
    async fn operations_before_connect_are_refused() {
        let (transport, log) = RecordingTransport::new(Vec::new());
        let mut client = ScopedClient::new(Box::new(transport));
        let err = client.subscribe("commands", Qos::AtLeastOnce).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert!(log.lock().unwrap().subscribed.is_empty());
    }
}
