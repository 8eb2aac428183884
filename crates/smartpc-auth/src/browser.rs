//! Opening the authorization URL for the operator

use tracing::info;

use crate::error::FlowError;

/// Something that can show the operator an authorization URL.
///
/// Must not block until the operator finishes; the flow waits on the
/// callback server, not on the launcher.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), FlowError>;
}

/// Opens the platform default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), FlowError> {
        info!("opening browser for authorization");
        webbrowser::open(url).map_err(|e| FlowError::Browser(e.to_string()))
    }
}

/// Prints the URL instead of launching anything, for headless machines.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &str) -> Result<(), FlowError> {
        info!(url, "open this URL to authorize the agent");
        Ok(())
    }
}
