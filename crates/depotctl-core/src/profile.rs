//! Profile domain model and repository contract.
//!
//! A profile is a named, persisted configuration for one recurring upload or
//! download. Field-level rules are checked on save; filesystem existence is
//! only checked when an operation is launched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DepotError, Result};
use crate::operation::{OperationKind, OperationResult};

/// Summary of the most recent run, written back after each operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    pub outcome: String,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<u64>,
}

impl From<&OperationResult> for LastRun {
    fn from(result: &OperationResult) -> Self {
        Self {
            outcome: result.outcome.label().to_string(),
            finished_at: result.finished_at,
            build_id: result.build_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique, user-chosen identifier.
    pub name: String,
    pub kind: OperationKind,
    pub app_id: u32,
    pub depot_id: u32,
    /// Content root (upload) or destination directory (download).
    pub path: PathBuf,
    /// Branch to set the build live on. Upload only.
    pub channel: Option<String>,
    pub description: String,
    /// Manifest GID to fetch a historical build. Download only.
    pub manifest_id: Option<String>,
    pub last_run: Option<LastRun>,
}

impl Profile {
    pub fn upload(
        name: impl Into<String>,
        app_id: u32,
        depot_id: u32,
        content_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Upload,
            app_id,
            depot_id,
            path: content_root.into(),
            channel: None,
            description: String::new(),
            manifest_id: None,
            last_run: None,
        }
    }

    pub fn download(
        name: impl Into<String>,
        app_id: u32,
        depot_id: u32,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Download,
            app_id,
            depot_id,
            path: destination.into(),
            channel: None,
            description: String::new(),
            manifest_id: None,
            last_run: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_manifest(mut self, manifest_id: impl Into<String>) -> Self {
        self.manifest_id = Some(manifest_id.into());
        self
    }

    /// Checks the rules that hold regardless of the machine state.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DepotError::validation("name", "must not be empty"));
        }
        if self.name.trim() != self.name {
            return Err(DepotError::validation(
                "name",
                "must not start or end with whitespace",
            ));
        }
        if self.app_id == 0 {
            return Err(DepotError::validation("app_id", "must be a positive integer"));
        }
        if self.depot_id == 0 {
            return Err(DepotError::validation(
                "depot_id",
                "must be a positive integer",
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(DepotError::validation("path", "must not be empty"));
        }
        ensure_script_safe("path", &self.path.to_string_lossy())?;
        ensure_script_safe("description", &self.description)?;

        match self.kind {
            OperationKind::Upload => {
                if self.manifest_id.is_some() {
                    return Err(DepotError::validation(
                        "manifest_id",
                        "only download profiles can pin a manifest",
                    ));
                }
                if let Some(channel) = &self.channel {
                    if channel.is_empty() || channel.chars().any(char::is_whitespace) {
                        return Err(DepotError::validation(
                            "channel",
                            "must be a single word without whitespace",
                        ));
                    }
                    ensure_script_safe("channel", channel)?;
                }
            }
            OperationKind::Download => {
                if self.channel.is_some() {
                    return Err(DepotError::validation(
                        "channel",
                        "only upload profiles can target a channel",
                    ));
                }
                if let Some(manifest) = &self.manifest_id {
                    if manifest.is_empty() || !manifest.chars().all(|c| c.is_ascii_digit()) {
                        return Err(DepotError::validation(
                            "manifest_id",
                            "must be a decimal manifest GID",
                        ));
                    }
                    if manifest.parse::<u64>().is_err() {
                        return Err(DepotError::validation(
                            "manifest_id",
                            "does not fit in a 64-bit manifest GID",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that the profile's path exists right before an operation runs.
    pub fn validate_for_execution(&self) -> Result<()> {
        self.validate()?;
        if !is_existing_dir(&self.path) {
            let field = match self.kind {
                OperationKind::Upload => "content root",
                OperationKind::Download => "destination",
            };
            return Err(DepotError::validation(
                "path",
                format!("{} does not exist: {}", field, self.path.display()),
            ));
        }
        Ok(())
    }
}

fn is_existing_dir(path: &Path) -> bool {
    path.is_dir()
}

/// Rejects characters the external script parser cannot represent.
fn ensure_script_safe(field: &str, value: &str) -> Result<()> {
    if value.contains('"') || value.contains('\n') || value.contains('\r') {
        return Err(DepotError::validation(
            field,
            "must not contain double quotes or line breaks",
        ));
    }
    Ok(())
}

/// How `save` treats an existing profile with the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Fail with `DuplicateName` if the name is taken.
    Create,
    /// Replace the existing record, or insert if absent.
    Update,
}

/// An abstract repository for managing profile persistence.
///
/// Implementations keep names unique and return `list` ordered by name.
/// A store that cannot be parsed surfaces `DepotError::CorruptStore`.
#[async_trait::async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Profile>>;

    async fn load(&self, name: &str) -> Result<Profile>;

    async fn save(&self, profile: &Profile, mode: SaveMode) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_upload_profile() {
        let profile = Profile::upload("nightly", 480, 481, "/builds/game")
            .with_channel("beta")
            .with_description("Nightly build");
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_zero_ids_rejected() {
        let err = Profile::upload("nightly", 0, 481, "/builds/game")
            .validate()
            .unwrap_err();
        assert!(matches!(err, DepotError::Validation { ref field, .. } if field == "app_id"));

        let err = Profile::download("old", 480, 0, "/tmp/out")
            .validate()
            .unwrap_err();
        assert!(matches!(err, DepotError::Validation { ref field, .. } if field == "depot_id"));
    }

    #[test]
    fn test_kind_specific_fields() {
        let err = Profile::upload("u", 1, 2, "/c")
            .with_manifest("123")
            .validate()
            .unwrap_err();
        assert!(err.is_validation());

        let err = Profile::download("d", 1, 2, "/c")
            .with_channel("beta")
            .validate()
            .unwrap_err();
        assert!(err.is_validation());

        let err = Profile::download("d", 1, 2, "/c")
            .with_manifest("12ab")
            .validate()
            .unwrap_err();
        assert!(err.is_validation());

        assert!(Profile::download("d", 1, 2, "/c")
            .with_manifest("18446744073709551615")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_quotes_rejected() {
        let err = Profile::upload("u", 1, 2, "/c")
            .with_description("say \"hi\"")
            .validate()
            .unwrap_err();
        assert!(matches!(err, DepotError::Validation { ref field, .. } if field == "description"));
    }

    #[test]
    fn test_execution_requires_existing_path() {
        let profile = Profile::upload("u", 1, 2, "/definitely/not/here/depotctl");
        assert!(profile.validate().is_ok());
        assert!(profile.validate_for_execution().unwrap_err().is_validation());

        let dir = std::env::temp_dir();
        let profile = Profile::download("d", 1, 2, dir);
        assert!(profile.validate_for_execution().is_ok());
    }
}
