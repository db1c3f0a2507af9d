//! Directory-backed key-value store for persistent storage.
//!
//! ## Layout
//!
//! ```text
//! store_dir/
//! ├─ .lock            # Advisory lock for single-writer
//! ├─ syncState        # One file per key, value stored verbatim
//! └─ offline_course
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".lock";

/// A file-based key-value store.
///
/// Each key maps to one file inside the store directory. Values survive
/// process restarts.
///
/// # Durability
///
/// `set` writes to a temporary file, calls `File::sync_all()`, renames it
/// over the key's file and then syncs the directory. A crash at any point
/// leaves either the old or the new value, never a torn one.
///
/// # Locking
///
/// [`FileStore::open`] takes an exclusive advisory lock on the directory so
/// that only one engine per store exists at a time. Use
/// [`FileStore::open_read_only`] to inspect a store that is in use.
///
/// # Example
///
/// ```no_run
/// use syncore_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-data")).unwrap();
/// store.set("syncState", "{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    read_only: bool,
    write_lock: Mutex<()>,
    _lock_file: Option<File>,
}

impl FileStore {
    /// Opens or creates a store directory and takes its exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the store,
    /// or an I/O error if the directory cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        tracing::debug!(path = %path.display(), "opened file store");

        Ok(Self {
            path: path.to_path_buf(),
            read_only: false,
            write_lock: Mutex::new(()),
            _lock_file: Some(lock_file),
        })
    }

    /// Opens an existing store directory without locking it.
    ///
    /// Writes through a read-only store fail with
    /// [`StorageError::WriteRejected`].
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not an existing directory.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("store directory does not exist: {}", path.display()),
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            read_only: true,
            write_lock: Mutex::new(()),
            _lock_file: None,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists the keys currently stored, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.path.join(key))
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::WriteRejected(format!(
                "store at {} is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| {
                StorageError::Corrupted(format!("value for key {key:?} is not valid UTF-8"))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        self.check_writable()?;
        let temp_path = self.path.join(format!(".{key}.tmp"));

        let _guard = self.write_lock.lock();

        let mut file = File::create(&temp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        self.sync_directory()?;

        tracing::trace!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        self.check_writable()?;

        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
