//! Atomic TOML file operations.
//!
//! Writes go through a temporary file, fsync and rename so a crash never
//! leaves a half-written store behind. Read-modify-write cycles hold an
//! exclusive lock file for their whole duration.

use chrono::Utc;
use depotctl_core::{DepotError, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A handle to a TOML file that is replaced atomically on every write.
pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and deserializes the file.
    ///
    /// - `Ok(None)`: the file doesn't exist or is empty
    /// - `Err(CorruptStore)`: the file exists but is not a valid document
    pub fn load(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| DepotError::io_at(&self.path, e))?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        toml::from_str(&content)
            .map(Some)
            .map_err(|e| DepotError::corrupt_store(&self.path, e.to_string()))
    }

    /// Serializes `data` and replaces the file atomically.
    pub fn save(&self, data: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| DepotError::io_at(parent, e))?;
            }
        }

        let toml_string = toml::to_string_pretty(data)?;

        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path).map_err(|e| DepotError::io_at(&tmp_path, e))?;
        tmp_file
            .write_all(toml_string.as_bytes())
            .and_then(|_| tmp_file.sync_all())
            .map_err(|e| DepotError::io_at(&tmp_path, e))?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path).map_err(|e| DepotError::io_at(&self.path, e))?;

        Ok(())
    }

    /// Read-modify-write under an exclusive lock.
    ///
    /// `f` sees the current document (or `default_value` if there is none).
    /// Nothing is written when `f` returns an error.
    pub fn update<F, R>(&self, default_value: T, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _lock = FileLock::acquire(&self.path)?;

        let mut data = self.load()?.unwrap_or(default_value);
        let out = f(&mut data)?;
        self.save(&data)?;

        Ok(out)
    }

    /// Moves an unreadable file aside as `<name>.corrupt-<timestamp>`.
    ///
    /// Returns the new location, or `None` if there was nothing to move.
    pub fn quarantine(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DepotError::internal("store path has no file name"))?;
        let target = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            file_name,
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        fs::rename(&self.path, &target).map_err(|e| DepotError::io_at(&self.path, e))?;
        Ok(Some(target))
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| DepotError::internal("store path has no parent directory"))?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| DepotError::internal("store path has no file name"))?;

        Ok(parent.join(format!(".{}.tmp", file_name.to_string_lossy())))
    }
}

/// Exclusive lock guard; the lock file is removed on drop.
struct FileLock {
    #[allow(dead_code)]
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self> {
        let lock_path = path.with_extension("lock");

        if let Some(parent) = lock_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| DepotError::io_at(parent, e))?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| DepotError::io_at(&lock_path, e))?;

        use fs2::FileExt;
        file.lock_exclusive()
            .map_err(|e| DepotError::io_at(&lock_path, e))?;

        Ok(FileLock { file, lock_path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Unlock happens when the handle closes; removing the file is best effort
        let _ = fs::remove_file(&self.lock_path);
    }
}
