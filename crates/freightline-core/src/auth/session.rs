use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{CredentialStore, Credentials};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Credentials persisted as JSON in the cache directory.
///
/// The file is read once at construction and written through on every
/// change, so request decoration never touches the disk.
pub struct FileStore {
    path: PathBuf,
    cached: RwLock<Option<Credentials>>,
}

impl FileStore {
    /// Open (or prepare) `session.json` inside `cache_dir`.
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        let path = cache_dir.as_ref().join(SESSION_FILE);
        let cached = match Self::read(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable session file");
                None
            }
        };
        debug!(path = %path.display(), has_session = cached.is_some(), "Session file loaded");
        Self {
            path,
            cached: RwLock::new(cached),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<Option<Credentials>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read session file")?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let data: Credentials =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(data))
    }

    fn write(&self, data: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .context("Failed to restrict session file permissions")?;
        }
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Option<Credentials> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        // Memory first: a failed write must not lose freshly issued tokens
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        self.write(credentials)
    }

    fn clear(&self) -> Result<()> {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::new(dir.path());
        assert!(store.load().is_none());
        store
            .save(&Credentials::new(Some("a1".into()), Some("r1".into())))
            .unwrap();
        assert!(store.path().exists());

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.access_token().as_deref(), Some("a1"));
        assert_eq!(reopened.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .save(&Credentials::new(Some("a1".into()), None))
            .unwrap();

        store.clear().unwrap();
        assert!(store.load().is_none());
        assert!(!store.path().exists());

        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_session_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").unwrap();

        let store = FileStore::new(dir.path());
        assert!(store.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .save(&Credentials::new(Some("a1".into()), Some("r1".into())))
            .unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
