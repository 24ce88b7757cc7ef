use serde::Serialize;
use std::path::{Path, PathBuf};

/// A resolved external tool installation.
///
/// All paths are absolute and OS-native. Produced by the installation
/// resolver; nothing here touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInstallation {
    /// Directory that contains the tool (the "content builder" root).
    pub root: PathBuf,
    /// The executable or launcher script.
    pub executable: PathBuf,
    /// Where generated build scripts are written.
    pub script_dir: PathBuf,
    /// Where the tool writes build logs and cache.
    pub build_output_dir: PathBuf,
    /// Directory with the tool's own console logs.
    pub log_dir: PathBuf,
}

impl ToolInstallation {
    /// Directory the tool must be started from.
    pub fn working_dir(&self) -> &Path {
        self.executable.parent().unwrap_or(&self.root)
    }

    /// The console log the tool appends to while running.
    pub fn console_log(&self) -> PathBuf {
        self.log_dir.join("console_log.txt")
    }

    /// The directory where a bare `download_depot` leaves its content.
    pub fn default_download_dir(&self, app_id: u32, depot_id: u32) -> PathBuf {
        self.working_dir()
            .join("steamapps")
            .join("content")
            .join(format!("app_{}", app_id))
            .join(format!("depot_{}", depot_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let root = PathBuf::from("/opt/sdk/tools/ContentBuilder");
        let exe_dir = root.join("builder_linux");
        let inst = ToolInstallation {
            root: root.clone(),
            executable: exe_dir.join("steamcmd.sh"),
            script_dir: root.join("scripts"),
            build_output_dir: root.join("output"),
            log_dir: exe_dir.join("logs"),
        };
        assert_eq!(inst.working_dir(), exe_dir.as_path());
        assert_eq!(inst.console_log(), exe_dir.join("logs").join("console_log.txt"));
        assert_eq!(
            inst.default_download_dir(480, 481),
            exe_dir
                .join("steamapps")
                .join("content")
                .join("app_480")
                .join("depot_481")
        );
    }
}
