//! Inbound command envelope

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// `{ "type": ..., "data": { "command": ..., "parameter": ... } }`
///
/// `parameter` is left as raw JSON; handlers decode it into their own type
/// with `parameter()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: CommandData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    pub command: String,
    #[serde(default)]
    pub parameter: serde_json::Value,
}

impl CommandEnvelope {
    pub fn command(&self) -> &str {
        &self.data.command
    }

    /// Decode the command parameter.
    pub fn parameter<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.parameter)
    }
}
