//! File-backed token persistence
//!
//! Stores the current token as JSON. Writes go to a temp file in the same
//! directory and are renamed over the target so a crash never leaves a
//! half-written token behind. The file is 0600 on Unix.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::error::{Error, Result};
use crate::store::{TokenLoader, TokenSaver};
use crate::token::Token;

/// Token persistence in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored token. A missing file is `Error::NotFound`.
    pub async fn read(&self) -> Result<Token> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "no token file at {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(Error::Io(format!("reading token file: {e}"))),
        };
        let token = serde_json::from_str(&contents)
            .map_err(|e| Error::CredentialParse(format!("parsing token file: {e}")))?;
        debug!(path = %self.path.display(), "loaded token");
        Ok(token)
    }

    pub async fn write(&self, token: &Token) -> Result<()> {
        write_atomic(&self.path, token).await
    }
}

impl TokenLoader for FileTokenStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + '_>> {
        Box::pin(self.read())
    }
}

impl TokenSaver for FileTokenStore {
    fn save<'a>(&'a self, token: &'a Token) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.write(token))
    }
}

async fn write_atomic(path: &Path, token: &Token) -> Result<()> {
    let json = serde_json::to_string_pretty(token)
        .map_err(|e| Error::CredentialParse(format!("serializing token: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating token directory: {e}")))?;

    let tmp_path = dir.join(format!(".token.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted token");
    Ok(())
}
