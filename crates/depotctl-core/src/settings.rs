//! User settings model.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the external console is driven.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TransportKind {
    /// Child process with piped stdin/stdout.
    #[default]
    Pipe,
    /// Visible terminal window fed by OS keystroke automation.
    Window,
}

/// Persisted application settings.
///
/// Every field has a default so older or partial settings files still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the content builder installation.
    pub tool_root: Option<PathBuf>,
    /// Account name remembered between runs. The password is never stored.
    pub username: Option<String>,
    /// Overrides `<tool_root>/output` as the build output directory.
    pub build_output: Option<PathBuf>,
    pub login_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub second_factor_retries: u32,
    pub transport: TransportKind,
    /// How long a freshly started process must stay alive to count as launched.
    pub launch_grace_ms: u64,
    /// Extra arguments passed to the tool on launch.
    pub extra_args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tool_root: None,
            username: None,
            build_output: None,
            login_timeout_secs: 120,
            operation_timeout_secs: 7200,
            second_factor_retries: 3,
            transport: TransportKind::Pipe,
            launch_grace_ms: 500,
            extra_args: Vec::new(),
        }
    }
}

impl Settings {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }
}
