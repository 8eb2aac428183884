//! Transport errors and their closure classification

use std::fmt;

/// Why a connection ended without the caller asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// We already sent a close frame and the peer finished the handshake.
    CloseSent,
    /// Connection dropped without a close frame (1006).
    Abnormal,
    /// Close frame carried no status code (1005).
    NoStatus,
    /// The socket was used after it had already been closed locally.
    LocalClosed,
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseKind::CloseSent => "close sent",
            CloseKind::Abnormal => "abnormal closure",
            CloseKind::NoStatus => "no status received",
            CloseKind::LocalClosed => "use of closed network connection",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    /// The broker refused the session or closed it with an error status.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    #[error("connection closed: {0}")]
    Closed(CloseKind),

    #[error("not connected")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether this error is an ordinary connection closure.
    ///
    /// Closures trigger an immediate reconnect and never consume the retry
    /// budget; everything else counts as a failure.
    pub fn is_expected_closure(&self) -> bool {
        matches!(self, TransportError::Closed(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
