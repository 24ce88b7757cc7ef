//! Chooses which installation and console launcher an operation uses.

use depotctl_core::installation::ToolInstallation;
use depotctl_core::profile::Profile;
use depotctl_core::settings::{Settings, TransportKind};
use depotctl_core::{DepotError, Result};
use depotctl_execution::{
    ConsoleLauncher, PipeLauncher, ScriptedLauncher, WindowLauncher, platform_automation,
};
use depotctl_infrastructure::resolve_installation;
use std::path::PathBuf;
use std::sync::Arc;

/// Where operations run: the real tool or a stand-in.
pub trait ConsoleBackend: Send + Sync {
    /// Resolves the installation that `settings` point at.
    fn installation(&self, settings: &Settings) -> Result<ToolInstallation>;

    /// The launcher for one operation on `profile`.
    fn launcher(&self, settings: &Settings, profile: &Profile) -> Result<Arc<dyn ConsoleLauncher>>;
}

/// Runs the installed tool through the configured transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolBackend;

impl ConsoleBackend for ToolBackend {
    fn installation(&self, settings: &Settings) -> Result<ToolInstallation> {
        let root = settings
            .tool_root
            .as_deref()
            .ok_or_else(|| DepotError::config("tool_root is not configured"))?;
        resolve_installation(root, settings.build_output.as_deref())
    }

    fn launcher(&self, settings: &Settings, _profile: &Profile) -> Result<Arc<dyn ConsoleLauncher>> {
        match settings.transport {
            TransportKind::Pipe => Ok(Arc::new(PipeLauncher::new(
                settings.extra_args.clone(),
                settings.launch_grace(),
            ))),
            TransportKind::Window => {
                let automation = platform_automation().ok_or_else(|| {
                    DepotError::config("the window transport is not available on this platform")
                })?;
                Ok(Arc::new(WindowLauncher::new(automation)))
            }
        }
    }
}

/// Plays a scripted session instead of starting the tool.
///
/// Uses the configured installation when it resolves, otherwise a
/// placeholder installation under `fallback_root` so scripts still get
/// written somewhere inspectable.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    fallback_root: PathBuf,
}

impl SimulatedBackend {
    pub fn new(fallback_root: impl Into<PathBuf>) -> Self {
        Self {
            fallback_root: fallback_root.into(),
        }
    }
}

impl ConsoleBackend for SimulatedBackend {
    fn installation(&self, settings: &Settings) -> Result<ToolInstallation> {
        if let Ok(installation) = ToolBackend.installation(settings) {
            return Ok(installation);
        }
        let root = self.fallback_root.clone();
        tracing::info!(
            "[SimulatedBackend] No usable tool installation, using {}",
            root.display()
        );
        Ok(ToolInstallation {
            executable: root.join("builder").join("steamcmd.sh"),
            script_dir: root.join("scripts").join("depotctl"),
            build_output_dir: root.join("output"),
            log_dir: root.join("builder").join("logs"),
            root,
        })
    }

    fn launcher(&self, _settings: &Settings, profile: &Profile) -> Result<Arc<dyn ConsoleLauncher>> {
        Ok(Arc::new(ScriptedLauncher::simulate(profile)))
    }
}
