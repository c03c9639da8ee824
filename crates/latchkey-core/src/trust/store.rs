//! Secure keyed store backends.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Device-local, opaque key/value storage for credentials.
///
/// Deleting a key that does not exist succeeds.
pub trait SecureStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value by key, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value by key.
    fn delete(&self, key: &str) -> Result<()>;
}

/// File-backed store, one file per key under `<data_dir>/keystore`.
///
/// File names are the hex encoding of the key so arbitrary keys map to
/// portable names. Writes go through a temp file and a rename, and files are
/// restricted to the owner on unix.
#[derive(Debug, Clone)]
pub struct FileSecureStore {
    base_dir: PathBuf,
}

impl FileSecureStore {
    /// Open the store rooted at `<data_dir>/keystore`, creating it if needed.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let base_dir = data_dir.join("keystore");
        fs::create_dir_all(&base_dir)
            .map_err(|e| io_error("failed to create keystore directory", &e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&base_dir, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_error("failed to restrict keystore directory", &e))?;
        }

        Ok(Self { base_dir })
    }

    /// The directory holding the key files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(hex::encode(key.as_bytes()))
    }
}

impl SecureStore for FileSecureStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.file_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("failed to read keystore entry", &e)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.file_path(key);
        let temp_path = path.with_extension("tmp");

        fs::write(&temp_path, value).map_err(|e| io_error("failed to write keystore entry", &e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| io_error("failed to restrict keystore entry", &e))?;
        }

        fs::rename(&temp_path, &path).map_err(|e| io_error("failed to commit keystore entry", &e))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.file_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("failed to delete keystore entry", &e)),
        }
    }
}

fn io_error(context: &str, err: &io::Error) -> Error {
    Error::Store(format!("{context}: {err}"))
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> T) -> Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        Ok(f(&mut entries))
    }
}

impl SecureStore for MemorySecureStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_vec());
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(key);
        })
    }
}

impl<S: SecureStore + ?Sized> SecureStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}
