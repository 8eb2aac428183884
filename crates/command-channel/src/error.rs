//! Error types for the command channel

use transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid channel configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("channel cancelled")]
    Cancelled,

    #[error("giving up after {attempts} consecutive failures: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("channel cannot handle event {event} in state {state}")]
    UnhandledEvent { state: String, event: String },
}

impl Error {
    /// Whether this error is an ordinary connection closure rather than a
    /// failure.
    pub fn is_expected_closure(&self) -> bool {
        matches!(self, Error::Transport(e) if e.is_expected_closure())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
