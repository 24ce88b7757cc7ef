//! Locates the external tool inside a content builder installation.

use depotctl_core::installation::ToolInstallation;
use depotctl_core::{DepotError, Result};
use std::path::{Path, PathBuf};

/// Executable locations relative to the installation root, most specific first.
#[cfg(target_os = "windows")]
pub const EXECUTABLE_CANDIDATES: &[&str] = &["builder/steamcmd.exe", "steamcmd.exe"];

#[cfg(target_os = "macos")]
pub const EXECUTABLE_CANDIDATES: &[&str] = &[
    "builder_osx/steamcmd.sh",
    "builder/steamcmd.sh",
    "steamcmd.sh",
];

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const EXECUTABLE_CANDIDATES: &[&str] = &[
    "builder_linux/steamcmd.sh",
    "builder/steamcmd.sh",
    "steamcmd.sh",
];

/// Resolves the executable, script and output directories under `root`.
///
/// Fails with `Launch` when no known executable is present, since nothing
/// can be started from such an installation.
pub fn resolve_installation(root: &Path, build_output: Option<&Path>) -> Result<ToolInstallation> {
    let root = std::path::absolute(root).map_err(|e| DepotError::io_at(root, e))?;

    if !root.is_dir() {
        return Err(DepotError::Launch(format!(
            "tool root does not exist: {}",
            root.display()
        )));
    }

    let executable = EXECUTABLE_CANDIDATES
        .iter()
        .map(|rel| root.join(rel))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            DepotError::Launch(format!(
                "no steamcmd executable under {} (looked for {})",
                root.display(),
                EXECUTABLE_CANDIDATES.join(", ")
            ))
        })?;

    let exe_dir = executable
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.clone());

    let build_output_dir = match build_output {
        Some(dir) => std::path::absolute(dir).map_err(|e| DepotError::io_at(dir, e))?,
        None => root.join("output"),
    };

    let installation = ToolInstallation {
        script_dir: root.join("scripts").join("depotctl"),
        build_output_dir,
        log_dir: exe_dir.join("logs"),
        executable,
        root,
    };

    tracing::debug!(
        "[Installation] Resolved {} -> {}",
        installation.root.display(),
        installation.executable.display()
    );
    Ok(installation)
}

/// Returns the first candidate path for `root`, used in error hints.
pub fn expected_executable(root: &Path) -> PathBuf {
    root.join(EXECUTABLE_CANDIDATES[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolves_platform_layout() {
        let temp_dir = TempDir::new().unwrap();
        let exe = expected_executable(temp_dir.path());
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "").unwrap();

        let inst = resolve_installation(temp_dir.path(), None).unwrap();
        assert_eq!(inst.executable, exe);
        assert_eq!(inst.script_dir, temp_dir.path().join("scripts").join("depotctl"));
        assert_eq!(inst.build_output_dir, temp_dir.path().join("output"));
        assert_eq!(inst.log_dir, exe.parent().unwrap().join("logs"));
    }

    #[test]
    fn test_falls_back_to_root_executable() {
        let temp_dir = TempDir::new().unwrap();
        let last = EXECUTABLE_CANDIDATES[EXECUTABLE_CANDIDATES.len() - 1];
        fs::write(temp_dir.path().join(last), "").unwrap();

        let out = temp_dir.path().join("custom-output");
        let inst = resolve_installation(temp_dir.path(), Some(&out)).unwrap();
        assert_eq!(inst.executable, temp_dir.path().join(last));
        assert_eq!(inst.build_output_dir, out);
    }

    #[test]
    fn test_missing_executable_is_launch_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = resolve_installation(temp_dir.path(), None).unwrap_err();
        assert!(matches!(err, DepotError::Launch(_)));

        let err = resolve_installation(&temp_dir.path().join("nope"), None).unwrap_err();
        assert!(matches!(err, DepotError::Launch(_)));
    }
}
