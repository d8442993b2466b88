use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{SavedSessions, SessionStore, StorageError};

/// Size of the legacy flash image
pub const LEGACY_IMAGE_SIZE: usize = 256 * 1024;

/// File-backed session store
///
/// Saves go to `<path>.tmp` first and are renamed over `<path>`, so a crash
/// mid-write leaves the previous image in place.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    pad_to: Option<usize>,
}

impl FileStore {
    /// Store at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pad_to: None,
        }
    }

    /// Zero-pad every saved image to `len` bytes
    #[must_use]
    pub fn with_padding(mut self, len: usize) -> Self {
        self.pad_to = Some(len);
        self
    }

    /// Location of the image
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Option<SavedSessions> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read session file: {}", e);
                return None;
            }
        };

        match SavedSessions::decode(&bytes) {
            Ok(sessions) => Some(sessions),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Ignoring invalid session file: {}", e);
                None
            }
        }
    }

    fn save(&mut self, sessions: &SavedSessions) -> Result<(), StorageError> {
        let mut image = sessions.encode()?;
        if let Some(len) = self.pad_to {
            if image.len() < len {
                image.resize(len, 0);
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.tmp_path();
        let result = (|| {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&image)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), "Failed to save session file: {}", e);
            if let Err(cleanup) = fs::remove_file(&tmp) {
                tracing::debug!(path = %tmp.display(), "Temp file not removed: {}", cleanup);
            }
            return Err(e.into());
        }

        tracing::debug!(
            path = %self.path.display(),
            clients = sessions.clients.len(),
            "Saved sessions"
        );
        Ok(())
    }
}

/// Move sessions out of the legacy image into `store`, once
///
/// Does nothing when `store` already holds a valid image. Otherwise the legacy
/// contents (or an empty set when the legacy image is invalid) are saved to
/// `store` and the legacy image is overwritten with a name-only placeholder.
/// Returns whether a migration happened.
///
/// # Errors
///
/// Returns `StorageError` if either save fails.
pub fn migrate_legacy(
    legacy: &mut dyn SessionStore,
    store: &mut dyn SessionStore,
) -> Result<bool, StorageError> {
    if store.load().is_some() {
        return Ok(false);
    }

    let sessions = legacy.load().unwrap_or_default();
    tracing::info!(
        clients = sessions.clients.len(),
        has_identity = sessions.identity.is_some(),
        "Migrating legacy session image"
    );
    store.save(&sessions)?;
    legacy.save(&SavedSessions::placeholder(sessions.name.clone()))?;
    Ok(true)
}
