//! Resilient command channel
//!
//! Owns the transport for its whole life. Each connect attempt fetches
//! fresh credentials, scopes every topic to the subject, subscribes to the
//! command topic and then dispatches deliveries one at a time, publishing
//! one acknowledgment per accepted command. Reconnects are driven by the
//! pure state machine in `state`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use transport::{ConnectRequest, LastWill, Qos, Transport};

use crate::ack::LogMessage;
use crate::credentials::CredentialSource;
use crate::dispatcher::{CommandContext, Dispatcher, Handler};
use crate::error::{Error, Result};
use crate::metrics;
use crate::scoped::ScopedClient;
use crate::state::{self, ChannelAction, ChannelEvent, ChannelState, RetryPolicy};
use crate::topic::TopicNamespace;

/// Topic names here are logical; the manager scopes them per subject.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub client_id: String,
    pub command_topic: String,
    /// Envelope `type` accepted on the command topic
    pub message_type: String,
    pub log_topic: String,
    /// `type` stamped on acknowledgments
    pub log_message_type: String,
    pub reconnect_delay: Duration,
    /// Consecutive retries before giving up
    pub reconnect_attempts: u32,
    /// Bound on the disconnect handshake in `stop`
    pub stop_grace: Duration,
    pub will: Option<LastWill>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            command_topic: String::new(),
            message_type: String::new(),
            log_topic: String::new(),
            log_message_type: String::new(),
            reconnect_delay: Duration::from_secs(5),
            reconnect_attempts: 3,
            stop_grace: Duration::from_secs(2),
            will: None,
        }
    }
}

impl ChannelConfig {
    /// Report every missing field at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.command_topic.trim().is_empty() {
            problems.push("topic required".to_string());
        }
        if self.message_type.trim().is_empty() {
            problems.push("message type required".to_string());
        }
        if self.log_topic.trim().is_empty() {
            problems.push("log topic required".to_string());
        }
        if self.log_message_type.trim().is_empty() {
            problems.push("log message type required".to_string());
        }
        if let Some(will) = &self.will
            && will.topic.trim().is_empty()
        {
            problems.push("last will topic required".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems))
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.reconnect_attempts,
            delay: self.reconnect_delay,
        }
    }
}

pub struct ChannelManager {
    config: ChannelConfig,
    client: ScopedClient,
    dispatcher: Dispatcher,
    credentials: Arc<dyn CredentialSource>,
    connected: bool,
    subscribed: bool,
}

impl ChannelManager {
    pub fn new(
        config: ChannelConfig,
        transport: Box<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.message_type.clone(), config.log_message_type.clone());
        Self {
            config,
            client: ScopedClient::new(transport),
            dispatcher,
            credentials,
            connected: false,
            subscribed: false,
        }
    }

    pub fn register(&mut self, command: impl Into<String>, handler: Arc<dyn Handler>) {
        self.dispatcher.register(command, handler);
    }

    pub fn set_default(&mut self, handler: Arc<dyn Handler>) {
        self.dispatcher.set_default(handler);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Run until cancelled or the reconnect budget is spent.
    ///
    /// Never returns `Ok`: cancellation surfaces as `Error::Cancelled` after
    /// the channel has been stopped.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.config.validate()?;
        let policy = self.config.retry_policy();
        let ctx = CommandContext {
            cancel: cancel.clone(),
        };

        let mut state = ChannelState::Disconnected;
        let mut event = ChannelEvent::Start;
        let mut last_error = String::new();

        loop {
            let (next, action) = state::handle_event(state, event, &policy);
            debug!(from = ?state, to = ?next, ?action, "channel transition");
            state = next;

            event = match action {
                ChannelAction::Connect => {
                    let opened = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        result = self.open() => result,
                    };
                    match opened {
                        Ok(()) => ChannelEvent::Subscribed,
                        Err(e) => classify(e, &mut last_error),
                    }
                }
                ChannelAction::Listen => match self.listen(&ctx, cancel).await {
                    Ok(()) => {
                        info!("broker closed the session, reconnecting");
                        metrics::record_reconnect("closure");
                        ChannelEvent::Released
                    }
                    Err(e) => classify(e, &mut last_error),
                },
                ChannelAction::ScheduleRetry { delay } => {
                    info!(delay_ms = delay.as_millis() as u64, "retrying channel connection");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => ChannelEvent::Cancel,
                        _ = tokio::time::sleep(delay) => ChannelEvent::RetryTimer,
                    }
                }
                ChannelAction::GiveUp { failures } => {
                    error!(failures, error = %last_error, "channel reconnect budget exhausted");
                    self.stop().await;
                    return Err(Error::RetriesExhausted {
                        attempts: failures,
                        last_error,
                    });
                }
                ChannelAction::Stop => {
                    self.stop().await;
                    return Err(Error::Cancelled);
                }
                ChannelAction::None => {
                    let err = unhandled(state, event);
                    error!(error = %err, "stopping channel");
                    self.stop().await;
                    return Err(err);
                }
            };
        }
    }

    /// Unsubscribe and disconnect. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if self.subscribed {
            if let Err(e) = self.client.unsubscribe(&self.config.command_topic).await {
                debug!(error = %e, "unsubscribe during stop failed");
            }
            self.subscribed = false;
        }
        if self.connected {
            if let Err(e) = self.client.disconnect(self.config.stop_grace).await {
                debug!(error = %e, "disconnect during stop failed");
            }
            self.connected = false;
            info!("command channel stopped");
        }
    }

    async fn open(&mut self) -> Result<()> {
        self.connected = false;
        self.subscribed = false;

        let password = self.credentials.access_token().await?;
        let subject = self.credentials.subject().await?;
        let request = ConnectRequest {
            client_id: self.config.client_id.clone(),
            username: subject.clone(),
            password,
            will: self.config.will.clone(),
        };

        self.client
            .connect(TopicNamespace::new(subject.as_str()), request)
            .await?;
        self.connected = true;

        self.client
            .subscribe(&self.config.command_topic, Qos::AtLeastOnce)
            .await?;
        self.subscribed = true;

        info!(subject = %subject, topic = %self.config.command_topic, "command channel subscribed");
        Ok(())
    }

    /// Dispatch deliveries until the session ends. `Ok` means the broker
    /// closed it normally.
    async fn listen(&mut self, ctx: &CommandContext, cancel: &CancellationToken) -> Result<()> {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                received = self.client.recv() => received?,
            };
            let Some(message) = received else {
                return Ok(());
            };

            if let Some(ack) = self.dispatcher.dispatch(ctx, &message.payload).await {
                self.acknowledge(&ack).await?;
            }
        }
    }

    /// A lost connection ends the session; any other publish failure is
    /// logged and the loop carries on.
    async fn acknowledge(&mut self, ack: &LogMessage) -> Result<()> {
        let payload = match serde_json::to_vec(ack) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(command = %ack.data.command, error = %e, "failed to encode acknowledgment");
                return Ok(());
            }
        };

        match self
            .client
            .publish(&self.config.log_topic, payload, Qos::AtLeastOnce, false)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_expected_closure() => Err(e.into()),
            Err(e) => {
                warn!(command = %ack.data.command, error = %e, "failed to publish acknowledgment");
                Ok(())
            }
        }
    }
}

fn unhandled(state: ChannelState, event: ChannelEvent) -> Error {
    Error::UnhandledEvent {
        state: format!("{state:?}"),
        event: format!("{event:?}"),
    }
}

fn classify(err: Error, last_error: &mut String) -> ChannelEvent {
    match err {
        Error::Cancelled => ChannelEvent::Cancel,
        err if err.is_expected_closure() => {
            debug!(error = %err, "connection closed, reconnecting");
            metrics::record_reconnect("closure");
            ChannelEvent::Released
        }
        err => {
            warn!(error = %err, "command channel failure");
            metrics::record_reconnect("failure");
            *last_error = err.to_string();
            ChannelEvent::Failed
        }
    }
}
