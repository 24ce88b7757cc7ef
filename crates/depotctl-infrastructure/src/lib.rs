pub mod dto;
pub mod installation;
pub mod paths;
pub mod script;
pub mod settings_service;
pub mod storage;
pub mod toml_history_repository;
pub mod toml_profile_repository;

pub use crate::installation::resolve_installation;
pub use crate::paths::DepotPaths;
pub use crate::script::{GeneratedScript, ScriptGenerator};
pub use crate::settings_service::SettingsService;
pub use crate::toml_history_repository::TomlHistoryRepository;
pub use crate::toml_profile_repository::TomlProfileRepository;
