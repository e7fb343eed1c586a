//! On-disk copy of the backend session, so a restart can resume it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::Session;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct SessionFile {
  path: PathBuf,
}

impl SessionFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Session file at the default location in the user data directory.
  pub fn open_default() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::config("Could not determine data directory"))?;

    Ok(Self::new(data_dir.join("tablesync").join("session.json")))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Read the stored session. A missing or unreadable file yields `None`.
  pub fn load(&self) -> Option<Session> {
    let contents = std::fs::read_to_string(&self.path).ok()?;
    match serde_json::from_str(&contents) {
      Ok(session) => Some(session),
      Err(e) => {
        tracing::warn!(path = %self.path.display(), error = %e, "ignoring corrupt session file");
        None
      }
    }
  }

  /// Write the session. The file holds tokens, so on unix it is readable
  /// by the owner only.
  pub fn save(&self, session: &Session) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::config(format!("Failed to create data directory: {}", e)))?;
    }
    let json = serde_json::to_vec_pretty(session)?;
    self.write_private(&json).map_err(|e| {
      Error::config(format!(
        "Failed to write session file {}: {}",
        self.path.display(),
        e
      ))
    })
  }

  fn write_private(&self, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
      use std::os::unix::fs::OpenOptionsExt;
      options.mode(0o600);
    }

    let mut file = options.open(&self.path)?;
    // `mode` only applies to new files; tighten one left by an older run
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
  }

  pub fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(Error::config(format!(
        "Failed to remove session file {}: {}",
        self.path.display(),
        e
      ))),
    }
  }
}
