//! On-disk record types and their migrators.
//!
//! Each store file is a flat document with a semver `version` key. Loading
//! goes through a `version_migrate::Migrator`, which picks the DTO for that
//! version, migrates it forward and converts it into the domain model.
//! Readers ignore fields they don't know.

use chrono::{DateTime, Utc};
use depotctl_core::operation::{FailureReason, OperationKind, OperationResult, Outcome};
use depotctl_core::profile::{LastRun, Profile};
use depotctl_core::settings::Settings;
use depotctl_core::{DepotError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use version_migrate::{FromDomain, IntoDomain, Migrator, Versioned};

pub const PROFILES_SCHEMA_VERSION: &str = "1.0.0";
pub const SETTINGS_SCHEMA_VERSION: &str = "1.0.0";
pub const HISTORY_SCHEMA_VERSION: &str = "1.0.0";

/// Rejects documents written by a newer, incompatible release.
pub fn check_schema_version(path: &Path, found: &str, supported: &str) -> Result<()> {
    let found_v = Version::parse(found).map_err(|e| {
        DepotError::corrupt_store(path, format!("invalid schema version '{}': {}", found, e))
    })?;
    let supported_v = Version::parse(supported)
        .map_err(|e| DepotError::internal(format!("bad built-in schema version: {}", e)))?;
    if found_v.major > supported_v.major {
        return Err(DepotError::corrupt_store(
            path,
            format!(
                "schema version {} is newer than supported {}",
                found_v, supported_v
            ),
        ));
    }
    Ok(())
}

fn registration_error(entity: &str, e: impl std::fmt::Debug) -> DepotError {
    DepotError::internal(format!("cannot register {} migration path: {:?}", entity, e))
}

// ============================================================================
// profiles.toml
// ============================================================================

/// `profiles.toml` V1.0.0: one `[[profile]]` table per profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct ProfilesFileV1_0_0 {
    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileDto>,
}

/// Type alias for the latest profiles file version.
pub type ProfilesFileDto = ProfilesFileV1_0_0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDto {
    pub name: String,
    pub kind: OperationKind,
    pub app_id: u32,
    pub depot_id: u32,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRunDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRunDto {
    pub outcome: String,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<u64>,
}

impl From<&Profile> for ProfileDto {
    fn from(p: &Profile) -> Self {
        Self {
            name: p.name.clone(),
            kind: p.kind,
            app_id: p.app_id,
            depot_id: p.depot_id,
            path: p.path.clone(),
            channel: p.channel.clone(),
            description: p.description.clone(),
            manifest_id: p.manifest_id.clone(),
            last_run: p.last_run.as_ref().map(|r| LastRunDto {
                outcome: r.outcome.clone(),
                finished_at: r.finished_at,
                build_id: r.build_id,
            }),
        }
    }
}

impl From<ProfileDto> for Profile {
    fn from(dto: ProfileDto) -> Self {
        Self {
            name: dto.name,
            kind: dto.kind,
            app_id: dto.app_id,
            depot_id: dto.depot_id,
            path: dto.path,
            channel: dto.channel,
            description: dto.description,
            manifest_id: dto.manifest_id,
            last_run: dto.last_run.map(|r| LastRun {
                outcome: r.outcome,
                finished_at: r.finished_at,
                build_id: r.build_id,
            }),
        }
    }
}

impl IntoDomain<Vec<Profile>> for ProfilesFileV1_0_0 {
    fn into_domain(self) -> Vec<Profile> {
        self.profiles.into_iter().map(Profile::from).collect()
    }
}

impl FromDomain<Vec<Profile>> for ProfilesFileV1_0_0 {
    fn from_domain(profiles: Vec<Profile>) -> Self {
        Self {
            profiles: profiles.iter().map(ProfileDto::from).collect(),
        }
    }
}

pub const PROFILES_ENTITY: &str = "profiles";

/// Migration path: V1.0.0 -> `Vec<Profile>`.
pub fn create_profiles_migrator() -> Result<Migrator> {
    let mut migrator = Migrator::builder().build();
    let path = Migrator::define(PROFILES_ENTITY)
        .from::<ProfilesFileV1_0_0>()
        .into_with_save::<Vec<Profile>>();
    migrator
        .register(path)
        .map_err(|e| registration_error(PROFILES_ENTITY, e))?;
    Ok(migrator)
}

// ============================================================================
// settings.toml
// ============================================================================

/// `settings.toml` V1.0.0: the settings live under a `[settings]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct SettingsFileV1_0_0 {
    #[serde(default)]
    pub settings: Settings,
}

pub type SettingsFileDto = SettingsFileV1_0_0;

impl IntoDomain<Settings> for SettingsFileV1_0_0 {
    fn into_domain(self) -> Settings {
        self.settings
    }
}

impl FromDomain<Settings> for SettingsFileV1_0_0 {
    fn from_domain(settings: Settings) -> Self {
        Self { settings }
    }
}

pub const SETTINGS_ENTITY: &str = "settings";

pub fn create_settings_migrator() -> Result<Migrator> {
    let mut migrator = Migrator::builder().build();
    let path = Migrator::define(SETTINGS_ENTITY)
        .from::<SettingsFileV1_0_0>()
        .into_with_save::<Settings>();
    migrator
        .register(path)
        .map_err(|e| registration_error(SETTINGS_ENTITY, e))?;
    Ok(migrator)
}

// ============================================================================
// history.toml
// ============================================================================

/// `history.toml` V1.0.0: `[[entry]]` tables, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Versioned)]
#[versioned(version = "1.0.0")]
pub struct HistoryFileV1_0_0 {
    #[serde(default, rename = "entry")]
    pub entries: Vec<HistoryEntryDto>,
}

pub type HistoryFileDto = HistoryFileV1_0_0;

/// Flat form of `OperationResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntryDto {
    pub id: Uuid,
    pub kind: OperationKind,
    pub profile_name: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default)]
    pub diagnostic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

impl From<&OperationResult> for HistoryEntryDto {
    fn from(r: &OperationResult) -> Self {
        let reason = match &r.outcome {
            Outcome::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        Self {
            id: r.id,
            kind: r.kind,
            profile_name: r.profile_name.clone(),
            outcome: r.outcome.label().to_string(),
            reason,
            diagnostic: r.diagnostic.clone(),
            build_id: r.build_id,
            output_path: r.output_path.clone(),
            finished_at: r.finished_at,
        }
    }
}

impl From<HistoryEntryDto> for OperationResult {
    fn from(dto: HistoryEntryDto) -> Self {
        let outcome = match dto.outcome.as_str() {
            "succeeded" => Outcome::Succeeded,
            "timed_out" => Outcome::TimedOut,
            "cancelled" => Outcome::Cancelled,
            _ => Outcome::Failed {
                reason: dto.reason.unwrap_or(FailureReason::Unclassified),
            },
        };
        Self {
            id: dto.id,
            kind: dto.kind,
            profile_name: dto.profile_name,
            outcome,
            diagnostic: dto.diagnostic,
            build_id: dto.build_id,
            output_path: dto.output_path,
            finished_at: dto.finished_at,
        }
    }
}

impl IntoDomain<Vec<OperationResult>> for HistoryFileV1_0_0 {
    fn into_domain(self) -> Vec<OperationResult> {
        self.entries.into_iter().map(OperationResult::from).collect()
    }
}

impl FromDomain<Vec<OperationResult>> for HistoryFileV1_0_0 {
    fn from_domain(entries: Vec<OperationResult>) -> Self {
        Self {
            entries: entries.iter().map(HistoryEntryDto::from).collect(),
        }
    }
}

pub const HISTORY_ENTITY: &str = "history";

pub fn create_history_migrator() -> Result<Migrator> {
    let mut migrator = Migrator::builder().build();
    let path = Migrator::define(HISTORY_ENTITY)
        .from::<HistoryFileV1_0_0>()
        .into_with_save::<Vec<OperationResult>>();
    migrator
        .register(path)
        .map_err(|e| registration_error(HISTORY_ENTITY, e))?;
    Ok(migrator)
}
