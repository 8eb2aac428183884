//! Acknowledgments published for every handled command

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported instead of the real cause for unexpected handler failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Outcome code on the wire: 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AckCode {
    Done,
    CommandFailed,
    Internal,
}

impl From<AckCode> for u8 {
    fn from(code: AckCode) -> Self {
        match code {
            AckCode::Done => 0,
            AckCode::CommandFailed => 1,
            AckCode::Internal => 2,
        }
    }
}

impl TryFrom<u8> for AckCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AckCode::Done),
            1 => Ok(AckCode::CommandFailed),
            2 => Ok(AckCode::Internal),
            other => Err(format!("unknown ack code {other}")),
        }
    }
}

impl AckCode {
    pub fn as_label(self) -> &'static str {
        match self {
            AckCode::Done => "done",
            AckCode::CommandFailed => "command_failed",
            AckCode::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: LogData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogData {
    pub command: String,
    pub received_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub code: AckCode,
    pub message: String,
}

impl LogMessage {
    pub fn done(
        message_type: &str,
        command: &str,
        received_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::build(message_type, command, received_at, completed_at, AckCode::Done, String::new())
    }

    /// Business failure; `reason` reaches the operator verbatim.
    pub fn command_failed(
        message_type: &str,
        command: &str,
        reason: &str,
        received_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            message_type,
            command,
            received_at,
            completed_at,
            AckCode::CommandFailed,
            reason.to_owned(),
        )
    }

    pub fn internal(
        message_type: &str,
        command: &str,
        received_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::build(
            message_type,
            command,
            received_at,
            completed_at,
            AckCode::Internal,
            INTERNAL_ERROR_MESSAGE.to_owned(),
        )
    }

    fn build(
        message_type: &str,
        command: &str,
        received_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        code: AckCode,
        message: String,
    ) -> Self {
        Self {
            message_type: message_type.to_owned(),
            data: LogData {
                command: command.to_owned(),
                received_at,
                completed_at,
                code,
                message,
            },
        }
    }
}
