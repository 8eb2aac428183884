//! Built-in command handlers

use std::time::Duration;

use command_channel::{
    ChannelManager, CommandContext, CommandEnvelope, CommandError, HandlerError, handler_fn,
};
use serde::Deserialize;
use tracing::info;

/// Longest delay a `ping` may ask for.
const MAX_PING_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct PingParameter {
    #[serde(default)]
    delay_ms: u64,
}

pub fn register(channel: &mut ChannelManager) {
    channel.register("ping", handler_fn(ping));
    channel.set_default(handler_fn(unknown));
}

/// Liveness check. Optionally waits `delay_ms` before acknowledging.
async fn ping(ctx: CommandContext, envelope: CommandEnvelope) -> Result<(), HandlerError> {
    let parameter: PingParameter = if envelope.data.parameter.is_null() {
        PingParameter::default()
    } else {
        envelope
            .parameter()
            .map_err(|e| CommandError::new(format!("invalid ping parameter: {e}")))?
    };

    let delay = Duration::from_millis(parameter.delay_ms);
    if delay > MAX_PING_DELAY {
        return Err(CommandError::new(format!(
            "delay_ms must be at most {}",
            MAX_PING_DELAY.as_millis()
        ))
        .into());
    }

    if !delay.is_zero() {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(CommandError::new("agent is shutting down").into()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!(delay_ms = parameter.delay_ms, "ping");
    Ok(())
}

async fn unknown(_ctx: CommandContext, envelope: CommandEnvelope) -> Result<(), HandlerError> {
    Err(CommandError::new(format!("unknown command: {}", envelope.command())).into())
}
