//! Command registry and acknowledgment production
//!
//! Inbound payloads are decoded into a `CommandEnvelope`, matched against
//! the expected message type, routed to the handler registered for the
//! command (or the default handler), and turned into exactly one
//! `LogMessage`. Messages that fail any of those checks are dropped
//! without an acknowledgment.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ack::LogMessage;
use crate::envelope::CommandEnvelope;
use crate::metrics;

/// Failure the operator caused or can act on. Reported verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Anything else. Logged in full, reported as "internal error".
    #[error("{0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn internal(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Internal(err.into())
    }
}

/// Per-message context handed to handlers.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Cancelled when the channel shuts down.
    pub cancel: CancellationToken,
}

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a CommandContext, envelope: &'a CommandEnvelope) -> HandlerFuture<'a>;
}

/// Adapts an async closure into a `Handler`.
pub struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(CommandContext, CommandEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a CommandContext, envelope: &'a CommandEnvelope) -> HandlerFuture<'a> {
        Box::pin((self.0)(ctx.clone(), envelope.clone()))
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(CommandContext, CommandEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

pub struct Dispatcher {
    message_type: String,
    log_message_type: String,
    handlers: HashMap<String, Arc<dyn Handler>>,
    default: Option<Arc<dyn Handler>>,
}

impl Dispatcher {
    /// `message_type` is the envelope type accepted, `log_message_type` the
    /// type stamped on acknowledgments.
    pub fn new(message_type: impl Into<String>, log_message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            log_message_type: log_message_type.into(),
            handlers: HashMap::new(),
            default: None,
        }
    }

    /// Register `handler` for `command`, replacing any previous one.
    pub fn register(&mut self, command: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(command.into(), handler);
    }

    /// Handler for commands with no specific registration.
    pub fn set_default(&mut self, handler: Arc<dyn Handler>) {
        self.default = Some(handler);
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn log_message_type(&self) -> &str {
        &self.log_message_type
    }

    /// Handle one inbound payload. Returns the acknowledgment to publish,
    /// or `None` when the message is dropped.
    pub async fn dispatch(&self, ctx: &CommandContext, payload: &[u8]) -> Option<LogMessage> {
        let envelope: CommandEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "discarding undecodable message");
                metrics::record_discarded("decode");
                return None;
            }
        };
        let received_at = Utc::now();

        if envelope.message_type != self.message_type {
            debug!(
                message_type = %envelope.message_type,
                expected = %self.message_type,
                "discarding message of unexpected type"
            );
            metrics::record_discarded("type_mismatch");
            return None;
        }

        let command = envelope.command();
        let Some(handler) = self.handlers.get(command).or(self.default.as_ref()) else {
            debug!(command, "no handler registered, discarding");
            metrics::record_discarded("no_handler");
            return None;
        };

        let outcome = handler.handle(ctx, &envelope).await;
        let completed_at = Utc::now();

        let ack = match outcome {
            Ok(()) => LogMessage::done(&self.log_message_type, command, received_at, completed_at),
            Err(HandlerError::Command(e)) => {
                debug!(command, reason = %e, "command failed");
                LogMessage::command_failed(
                    &self.log_message_type,
                    command,
                    &e.message,
                    received_at,
                    completed_at,
                )
            }
            Err(HandlerError::Internal(e)) => {
                warn!(command, error = %e, "command handler failed");
                LogMessage::internal(&self.log_message_type, command, received_at, completed_at)
            }
        };
        metrics::record_ack(ack.data.code);
        Some(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::{AckCode, INTERNAL_ERROR_MESSAGE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> CommandContext {
        CommandContext {
            cancel: CancellationToken::new(),
        }
    }

    fn payload(message_type: &str, command: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": message_type,
            "data": { "command": command, "parameter": { "n": 1 } }
        }))
        .unwrap()
    }

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new("command", "log");
        d.register("ok", handler_fn(|_, _| async { Ok(()) }));
        d.register(
            "busy",
            handler_fn(|_, _| async { Err(CommandError::new("user is busy").into()) }),
        );
        d.register(
            "crash",
            handler_fn(|_, _| async {
                Err(HandlerError::internal(std::io::Error::other("db connection lost")))
            }),
        );
        d
    }

    #[tokio::test]
    async fn success_is_acknowledged_done() {
        let ack = dispatcher().dispatch(&ctx(), &payload("command", "ok")).await.unwrap();
        assert_eq!(ack.message_type, "log");
        assert_eq!(ack.data.command, "ok");
        assert_eq!(ack.data.code, AckCode::Done);
        assert!(ack.data.message.is_empty());
        assert!(ack.data.received_at <= ack.data.completed_at);
    }

    #[tokio::test]
    async fn command_error_text_is_reported_verbatim() {
        let ack = dispatcher().dispatch(&ctx(), &payload("command", "busy")).await.unwrap();
        assert_eq!(ack.data.code, AckCode::CommandFailed);
        assert_eq!(ack.data.message, "user is busy");
    }

    #[tokio::test]
    async fn internal_error_details_are_hidden() {
        let ack = dispatcher().dispatch(&ctx(), &payload("command", "crash")).await.unwrap();
        assert_eq!(ack.data.code, AckCode::Internal);
        assert_eq!(ack.data.message, INTERNAL_ERROR_MESSAGE);
        assert!(!ack.data.message.contains("db connection"));
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        assert!(dispatcher().dispatch(&ctx(), b"{not json").await.is_none());
        assert!(dispatcher().dispatch(&ctx(), br#"{"type":"command"}"#).await.is_none());
    }

    #[tokio::test]
    async fn type_mismatch_is_dropped_without_running_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut d = Dispatcher::new("command", "log");
        let counter = calls.clone();
        d.register(
            "ok",
            handler_fn(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );

        assert!(d.dispatch(&ctx(), &payload("telemetry", "ok")).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_command_without_default_is_dropped() {
        assert!(dispatcher().dispatch(&ctx(), &payload("command", "reboot")).await.is_none());
    }

    #[tokio::test]
    async fn default_handler_catches_unknown_commands() {
        let mut d = dispatcher();
        d.set_default(handler_fn(|_, env: CommandEnvelope| async move {
            Err(CommandError::new(format!("unknown command {}", env.command())).into())
        }));

        let ack = d.dispatch(&ctx(), &payload("command", "reboot")).await.unwrap();
        assert_eq!(ack.data.code, AckCode::CommandFailed);
        assert_eq!(ack.data.message, "unknown command reboot");

        // Specific registrations still win over the default.
        let ack = d.dispatch(&ctx(), &payload("command", "ok")).await.unwrap();
        assert_eq!(ack.data.code, AckCode::Done);
    }

    #[tokio::test]
    async fn handler_sees_typed_parameter() {
        #[derive(serde::Deserialize)]
        struct Param {
            n: u32,
        }

        let mut d = Dispatcher::new("command", "log");
        d.register(
            "count",
            handler_fn(|_, env: CommandEnvelope| async move {
                match env.parameter::<Param>() {
                    Ok(p) if p.n == 1 => Ok(()),
                    Ok(_) => Err(HandlerError::Command(CommandError::new("wrong n"))),
                    Err(e) => Err(HandlerError::internal(e)),
                }
            }),
        );

        let ack = d.dispatch(&ctx(), &payload("command", "count")).await.unwrap();
        assert_eq!(ack.data.code, AckCode::Done);
    }

    #[tokio::test]
    async fn received_at_precedes_slow_completion() {
        let mut d = Dispatcher::new("command", "log");
        d.register(
            "slow",
            handler_fn(|_, _| async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(())
            }),
        );
        let ack = d.dispatch(&ctx(), &payload("command", "slow")).await.unwrap();
        assert!(ack.data.completed_at - ack.data.received_at >= chrono::Duration::milliseconds(20));
    }
}
