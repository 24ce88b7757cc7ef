//! Profile use cases.

use depotctl_core::operation::OperationResult;
use depotctl_core::profile::{LastRun, Profile, ProfileRepository, SaveMode};
use depotctl_core::{DepotError, Result};
use depotctl_infrastructure::TomlProfileRepository;
use std::path::PathBuf;
use std::sync::Arc;

/// Reported when the profile store had to be reset on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenWarning {
    pub message: String,
    /// Where the unreadable file was moved, if it could be moved.
    pub quarantined: Option<PathBuf>,
}

/// CRUD over saved profiles.
///
/// `create` refuses to overwrite; `update` refuses to create. Both validate
/// field rules, while the content path is only checked at launch.
pub struct ProfileService {
    repository: Arc<dyn ProfileRepository>,
}

impl ProfileService {
    pub fn new(repository: Arc<dyn ProfileRepository>) -> Self {
        Self { repository }
    }

    /// Opens the TOML store, recovering from corruption.
    ///
    /// A store that cannot be parsed is moved aside and the service starts
    /// empty; the returned warning tells the user what happened. Other
    /// errors (permissions, I/O) are returned as-is.
    pub async fn open(repository: Arc<TomlProfileRepository>) -> Result<(Self, Option<OpenWarning>)> {
        let warning = match repository.list().await {
            Ok(_) => None,
            Err(err @ DepotError::CorruptStore { .. }) => {
                let quarantined = repository.quarantine()?;
                let message = match &quarantined {
                    Some(path) => format!(
                        "{}; the file was moved to {} and profiles start empty",
                        err,
                        path.display()
                    ),
                    None => format!("{}; profiles start empty", err),
                };
                tracing::warn!("[ProfileService] {}", message);
                Some(OpenWarning {
                    message,
                    quarantined,
                })
            }
            Err(err) => return Err(err),
        };
        Ok((Self::new(repository), warning))
    }

    pub async fn list(&self) -> Result<Vec<Profile>> {
        self.repository.list().await
    }

    pub async fn get(&self, name: &str) -> Result<Profile> {
        self.repository.load(name).await
    }

    pub async fn create(&self, profile: Profile) -> Result<Profile> {
        self.repository.save(&profile, SaveMode::Create).await?;
        tracing::info!("[ProfileService] Created profile '{}'", profile.name);
        Ok(profile)
    }

    /// Replaces an existing profile. The stored `last_run` is kept.
    pub async fn update(&self, mut profile: Profile) -> Result<Profile> {
        let existing = self.repository.load(&profile.name).await?;
        if profile.last_run.is_none() {
            profile.last_run = existing.last_run;
        }
        self.repository.save(&profile, SaveMode::Update).await?;
        tracing::info!("[ProfileService] Updated profile '{}'", profile.name);
        Ok(profile)
    }

    /// Loads `name`, applies `f` and saves the result as an update.
    pub async fn edit<F>(&self, name: &str, f: F) -> Result<Profile>
    where
        F: FnOnce(&mut Profile),
    {
        let mut profile = self.repository.load(name).await?;
        f(&mut profile);
        if profile.name != name {
            return Err(DepotError::validation("name", "cannot be changed by an edit"));
        }
        self.repository.save(&profile, SaveMode::Update).await?;
        Ok(profile)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.repository.delete(name).await?;
        tracing::info!("[ProfileService] Deleted profile '{}'", name);
        Ok(())
    }

    /// Stores the outcome of an operation on its profile.
    pub async fn record_run(&self, result: &OperationResult) -> Result<()> {
        let mut profile = self.repository.load(&result.profile_name).await?;
        profile.last_run = Some(LastRun::from(result));
        self.repository.save(&profile, SaveMode::Update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> (ProfileService, Arc<TomlProfileRepository>) {
        let repository = Arc::new(TomlProfileRepository::with_path(
            dir.path().join("profiles.toml"),
        ));
        (ProfileService::new(repository.clone()), repository)
    }

    #[tokio::test]
    async fn test_update_requires_existing_and_keeps_last_run() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);

        let profile = Profile::upload("nightly", 480, 481, "/builds/nightly");
        let err = service.update(profile.clone()).await.unwrap_err();
        assert!(err.is_not_found());

        service.create(profile.clone()).await.unwrap();
        let result = OperationResult {
            id: uuid::Uuid::new_v4(),
            kind: profile.kind,
            profile_name: "nightly".to_string(),
            outcome: depotctl_core::operation::Outcome::Succeeded,
            diagnostic: String::new(),
            build_id: Some(77),
            output_path: None,
            finished_at: chrono::Utc::now(),
        };
        service.record_run(&result).await.unwrap();

        let updated = service
            .update(profile.with_description("second pass"))
            .await
            .unwrap();
        assert_eq!(updated.last_run.as_ref().and_then(|r| r.build_id), Some(77));
        assert_eq!(service.get("nightly").await.unwrap().description, "second pass");
    }

    #[tokio::test]
    async fn test_edit_rejects_rename() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _) = service(&temp_dir);
        service
            .create(Profile::download("old", 480, 481, "/archive"))
            .await
            .unwrap();

        let err = service
            .edit("old", |p| p.name = "new".to_string())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let edited = service
            .edit("old", |p| p.manifest_id = Some("123".to_string()))
            .await
            .unwrap();
        assert_eq!(edited.manifest_id.as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn test_open_recovers_from_corrupt_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("profiles.toml");
        std::fs::write(&path, "this is [not toml").unwrap();

        let repository = Arc::new(TomlProfileRepository::with_path(path.clone()));
        let (service, warning) = ProfileService::open(repository).await.unwrap();

        let warning = warning.unwrap();
        let moved = warning.quarantined.unwrap();
        assert!(moved.exists());
        assert!(!path.exists());
        assert!(service.list().await.unwrap().is_empty());

        service
            .create(Profile::upload("fresh", 480, 481, "/builds"))
            .await
            .unwrap();
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_clean_store_has_no_warning() {
        let temp_dir = TempDir::new().unwrap();
        let (_, repository) = service(&temp_dir);
        let (_, warning) = ProfileService::open(repository).await.unwrap();
        assert!(warning.is_none());
    }
}
