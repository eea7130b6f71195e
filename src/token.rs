//! Authentication token persistence.
//!
//! The device issues a token on the first approved pairing; presenting it on
//! later connects skips the prompt. Tokens are keyed by device id.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, Result};

/// Token persistence collaborator
pub trait TokenStore: Send + Sync {
    /// Stored token for `device_id`, if any
    fn load(&self, device_id: &str) -> Result<Option<String>>;

    /// Store `token` for `device_id`, replacing any previous value
    fn save(&self, device_id: &str, token: &str) -> Result<()>;
}

/// In-process store, mainly for tests and one-shot tools
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one token
    pub fn with_token(device_id: &str, token: &str) -> Self {
        let store = Self::new();
        store
            .lock()
            .insert(device_id.to_string(), token.to_string());
        store
    }

    /// Number of stored tokens
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no token is stored
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, device_id: &str) -> Result<Option<String>> {
        Ok(self.lock().get(device_id).cloned())
    }

    fn save(&self, device_id: &str, token: &str) -> Result<()> {
        self.lock()
            .insert(device_id.to_string(), token.to_string());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: BTreeMap<String, String>,
}

/// TOML file store:
///
/// ```toml
/// [tokens]
/// "192.168.1.20" = "12345678"
/// ```
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Store backed by `path` (created on first save)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TokenFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                RemoteError::TokenStore(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TokenFile::default()),
            Err(e) => Err(RemoteError::TokenStore(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write(&self, file: &TokenFile) -> Result<()> {
        let content = toml::to_string(file)
            .map_err(|e| RemoteError::TokenStore(format!("Failed to encode tokens: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, device_id: &str) -> Result<Option<String>> {
        Ok(self.read()?.tokens.get(device_id).cloned())
    }

    fn save(&self, device_id: &str, token: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut file = self.read()?;
        file.tokens
            .insert(device_id.to_string(), token.to_string());
        self.write(&file)?;

        tracing::debug!("Stored token for {} in {}", device_id, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::with_token("tv", "abc");
        assert_eq!(store.load("tv").unwrap().as_deref(), Some("abc"));
        assert_eq!(store.load("other").unwrap(), None);

        store.save("tv", "def").unwrap();
        assert_eq!(store.load("tv").unwrap().as_deref(), Some("def"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.toml"));
        assert_eq!(store.load("tv").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_per_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.toml");

        let store = FileTokenStore::new(&path);
        store.save("192.168.1.20", "11111111").unwrap();
        store.save("frame", "22222222").unwrap();
        store.save("192.168.1.20", "33333333").unwrap();

        let reopened = FileTokenStore::new(&path);
        assert_eq!(reopened.load("192.168.1.20").unwrap().as_deref(), Some("33333333"));
        assert_eq!(reopened.load("frame").unwrap().as_deref(), Some("22222222"));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.toml");
        std::fs::write(&path, "tokens = 5").unwrap();

        let store = FileTokenStore::new(&path);
        assert!(matches!(store.load("tv"), Err(RemoteError::TokenStore(_))));
    }
}
