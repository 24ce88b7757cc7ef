//! Path layout for depotctl configuration files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/depotctl/          # Config directory (platform default via `dirs`)
//! ├── settings.toml            # Tool root, timeouts, transport
//! ├── profiles.toml            # Saved upload/download profiles
//! ├── history.toml             # Most recent operation results
//! └── logs/                    # Application logs
//!     └── depotctl.log.YYYY-MM-DD
//! ```

use depotctl_core::{DepotError, Result};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "depotctl";

/// Resolved locations of every file depotctl persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotPaths {
    base: PathBuf,
}

impl DepotPaths {
    /// Uses `base_override` when given, else `<config_dir>/depotctl`.
    pub fn new(base_override: Option<PathBuf>) -> Result<Self> {
        let base = match base_override {
            Some(base) => base,
            None => dirs::config_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .ok_or_else(|| DepotError::config("Cannot find config directory"))?,
        };
        Ok(Self { base })
    }

    /// Roots every path at `base` (tests, portable installs).
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base.join("settings.toml")
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.base.join("profiles.toml")
    }

    pub fn history_file(&self) -> PathBuf {
        self.base.join("history.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }
}
