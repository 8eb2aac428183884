//! Channel counters
//!
//! - `channel_acks_total` (counter): label `code`
//! - `channel_messages_discarded_total` (counter): label `reason`
//! - `channel_reconnects_total` (counter): label `kind` (`closure`, `failure`)
//!
//! Recording is a no-op until the binary installs a recorder.

use crate::ack::AckCode;

pub(crate) fn record_ack(code: AckCode) {
    metrics::counter!("channel_acks_total", "code" => code.as_label()).increment(1);
}

pub(crate) fn record_discarded(reason: &'static str) {
    metrics::counter!("channel_messages_discarded_total", "reason" => reason).increment(1);
}

pub(crate) fn record_reconnect(kind: &'static str) {
    metrics::counter!("channel_reconnects_total", "kind" => kind).increment(1);
}
