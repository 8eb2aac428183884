//! Common types shared by the smart-PC agent crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
