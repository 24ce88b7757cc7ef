//! Settings service.
//!
//! Loads `settings.toml` lazily, caches it, and writes changes through
//! atomically.

use crate::dto::{SETTINGS_ENTITY, SETTINGS_SCHEMA_VERSION, create_settings_migrator};
use crate::paths::DepotPaths;
use crate::storage::{Schema, VersionedTomlFile};
use depotctl_core::Result;
use depotctl_core::settings::Settings;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Overrides the configured tool root for the current process.
pub const TOOL_ROOT_ENV: &str = "DEPOTCTL_TOOL_ROOT";

/// Settings service that loads and caches the user settings.
#[derive(Clone)]
pub struct SettingsService {
    file: Arc<VersionedTomlFile<Settings>>,
    /// Cached settings as stored on disk (without environment overrides).
    cache: Arc<RwLock<Option<Settings>>>,
}

impl SettingsService {
    pub fn new(paths: &DepotPaths) -> Self {
        Self::with_path(paths.settings_file())
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: Arc::new(VersionedTomlFile::new(
                path,
                Schema {
                    entity: SETTINGS_ENTITY,
                    version: SETTINGS_SCHEMA_VERSION,
                    migrator: create_settings_migrator,
                },
            )),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Effective settings: the stored values plus environment overrides.
    pub fn get(&self) -> Result<Settings> {
        let stored = self.stored()?;
        Ok(apply_env_override(stored, std::env::var_os(TOOL_ROOT_ENV)))
    }

    /// Settings exactly as stored on disk.
    pub fn stored(&self) -> Result<Settings> {
        {
            let read_lock = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *read_lock {
                return Ok(cached.clone());
            }
        }

        let loaded = self.file.load()?.unwrap_or_default();

        let mut write_lock = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = Some(loaded.clone());
        Ok(loaded)
    }

    /// Applies `f` to the stored settings and persists the result.
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let path = self.file.path().to_path_buf();
        let updated = self.file.update(Settings::default(), |settings| {
            f(settings)?;
            Ok(settings.clone())
        })?;

        let mut write_lock = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = Some(updated.clone());
        tracing::debug!("[Settings] Saved {}", path.display());
        Ok(updated)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = None;
    }
}

/// Replaces `tool_root` when the override variable is set and non-empty.
pub fn apply_env_override(mut settings: Settings, tool_root: Option<OsString>) -> Settings {
    if let Some(root) = tool_root.filter(|v| !v.is_empty()) {
        settings.tool_root = Some(PathBuf::from(root));
    }
    settings
}
