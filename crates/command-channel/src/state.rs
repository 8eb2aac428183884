//! Channel state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `ChannelManager::run` executes the I/O implied by each action.

use std::time::Duration;

/// Reconnect budget: at most `attempts` consecutive retries, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// `failures` counts consecutive unsuccessful connect-or-listen cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    /// Fetching credentials, connecting and subscribing
    Connecting { failures: u32 },
    /// Receiving commands
    Subscribed { failures: u32 },
    /// Waiting out the retry delay
    Reconnecting { failures: u32 },
    /// Terminal
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Start,
    /// Connected and subscribed to the command topic
    Subscribed,
    /// Hard failure while connecting or listening
    Failed,
    /// The session ended cleanly or through an expected closure
    Released,
    /// Retry delay elapsed
    RetryTimer,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// Fetch fresh credentials, connect and subscribe
    Connect,
    /// Receive and dispatch until the session ends
    Listen,
    ScheduleRetry { delay: Duration },
    /// Budget exhausted
    GiveUp { failures: u32 },
    /// Cancelled: unsubscribe and disconnect
    Stop,
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(
    state: ChannelState,
    event: ChannelEvent,
    policy: &RetryPolicy,
) -> (ChannelState, ChannelAction) {
    match (state, event) {
        // Cancellation wins from anywhere.
        (_, ChannelEvent::Cancel) => (ChannelState::Closed, ChannelAction::Stop),

        (ChannelState::Disconnected, ChannelEvent::Start) => (
            ChannelState::Connecting { failures: 0 },
            ChannelAction::Connect,
        ),

        (ChannelState::Connecting { failures }, ChannelEvent::Subscribed) => (
            ChannelState::Subscribed { failures },
            ChannelAction::Listen,
        ),

        (
            ChannelState::Connecting { failures } | ChannelState::Subscribed { failures },
            ChannelEvent::Failed,
        ) if failures < policy.attempts => (
            ChannelState::Reconnecting {
                failures: failures + 1,
            },
            ChannelAction::ScheduleRetry {
                delay: policy.delay,
            },
        ),

        (
            ChannelState::Connecting { failures } | ChannelState::Subscribed { failures },
            ChannelEvent::Failed,
        ) => (
            ChannelState::Closed,
            ChannelAction::GiveUp {
                failures: failures + 1,
            },
        ),

        // A released session was a successful cycle: reconnect with a
        // fresh budget.
        (
            ChannelState::Connecting { .. } | ChannelState::Subscribed { .. },
            ChannelEvent::Released,
        ) => (
            ChannelState::Connecting { failures: 0 },
            ChannelAction::Connect,
        ),

        (ChannelState::Reconnecting { failures }, ChannelEvent::RetryTimer) => (
            ChannelState::Connecting { failures },
            ChannelAction::Connect,
        ),

        // Invalid/unhandled transition: stay in current state
        (state, _event) => (state, ChannelAction::None),
    }
}
