//! TOML-based ProfileRepository implementation

use crate::dto::{PROFILES_ENTITY, PROFILES_SCHEMA_VERSION, create_profiles_migrator};
use crate::paths::DepotPaths;
use crate::storage::{Schema, VersionedTomlFile};
use async_trait::async_trait;
use depotctl_core::profile::{Profile, ProfileRepository, SaveMode};
use depotctl_core::{DepotError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Stores every profile as a `[[profile]]` table in one `profiles.toml`.
///
/// Responsibilities:
/// - Keep names unique and return profiles ordered by name
/// - Check the schema version and structure on every read
/// - Migrate older documents to the domain model
pub struct TomlProfileRepository {
    file: VersionedTomlFile<Vec<Profile>>,
}

impl TomlProfileRepository {
    pub fn new(paths: &DepotPaths) -> Self {
        Self::with_path(paths.profiles_file())
    }

    /// Creates a repository over a custom file (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            file: VersionedTomlFile::new(
                path,
                Schema {
                    entity: PROFILES_ENTITY,
                    version: PROFILES_SCHEMA_VERSION,
                    migrator: create_profiles_migrator,
                },
            ),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Moves a corrupt store aside so the repository starts empty.
    pub fn quarantine(&self) -> Result<Option<PathBuf>> {
        self.file.quarantine()
    }

    fn check_names(&self, profiles: &[Profile]) -> Result<()> {
        let mut seen = HashSet::new();
        for profile in profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(DepotError::corrupt_store(
                    self.file.path(),
                    format!("duplicate profile name '{}'", profile.name),
                ));
            }
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Profile>> {
        let mut profiles = self.file.load()?.unwrap_or_default();
        self.check_names(&profiles)?;
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }
}

#[async_trait]
impl ProfileRepository for TomlProfileRepository {
    async fn list(&self) -> Result<Vec<Profile>> {
        self.read_all()
    }

    async fn load(&self, name: &str) -> Result<Profile> {
        self.read_all()?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| DepotError::not_found("profile", name))
    }

    async fn save(&self, profile: &Profile, mode: SaveMode) -> Result<()> {
        profile.validate()?;

        self.file.update(Vec::new(), |profiles| {
            self.check_names(profiles)?;
            match profiles.iter_mut().find(|p| p.name == profile.name) {
                Some(_) if mode == SaveMode::Create => {
                    Err(DepotError::DuplicateName(profile.name.clone()))
                }
                Some(existing) => {
                    *existing = profile.clone();
                    Ok(())
                }
                None => {
                    profiles.push(profile.clone());
                    profiles.sort_by(|a, b| a.name.cmp(&b.name));
                    Ok(())
                }
            }
        })?;

        tracing::debug!(
            "[ProfileStore] Saved profile '{}' ({:?})",
            profile.name,
            mode
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.file.update(Vec::new(), |profiles| {
            self.check_names(profiles)?;
            let before = profiles.len();
            profiles.retain(|p| p.name != name);
            if profiles.len() == before {
                return Err(DepotError::not_found("profile", name));
            }
            Ok(())
        })?;

        tracing::debug!("[ProfileStore] Deleted profile '{}'", name);
        Ok(())
    }
}
