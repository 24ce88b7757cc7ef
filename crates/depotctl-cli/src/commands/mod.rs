pub mod history;
pub mod operation;
pub mod profile;
pub mod settings;

use anyhow::Result;
use colored::Colorize;
use depotctl_application::ProfileService;
use depotctl_infrastructure::{DepotPaths, SettingsService, TomlHistoryRepository, TomlProfileRepository};
use std::sync::Arc;

/// Services shared by every subcommand.
pub struct AppContext {
    pub paths: DepotPaths,
    pub settings: SettingsService,
    pub profiles: Arc<ProfileService>,
    pub history: Arc<TomlHistoryRepository>,
}

impl AppContext {
    /// Opens the stores under `paths`, reporting a reset profile store.
    pub async fn open(paths: DepotPaths) -> Result<Self> {
        let settings = SettingsService::new(&paths);
        let repository = Arc::new(TomlProfileRepository::new(&paths));
        let (profiles, warning) = ProfileService::open(repository).await?;
        if let Some(warning) = warning {
            eprintln!("{}", format!("warning: {}", warning.message).yellow());
        }
        let history = Arc::new(TomlHistoryRepository::new(&paths));
        Ok(Self {
            paths,
            settings,
            profiles: Arc::new(profiles),
            history,
        })
    }
}
