//! Configuration-level errors shared by the agent binary

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// One or more configuration problems, already joined for display.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Collapse a list of validation problems into a single `Config` error.
    ///
    /// Returns `None` when the list is empty so callers can write
    /// `if let Some(e) = Error::aggregate(problems) { return Err(e) }`.
    pub fn aggregate(problems: Vec<String>) -> Option<Self> {
        if problems.is_empty() {
            None
        } else {
            Some(Self::Config(problems.join("; ")))
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
