use depotctl_core::installation::ToolInstallation;
use std::path::PathBuf;

pub(crate) fn fake_installation() -> ToolInstallation {
    let root = PathBuf::from("/opt/ContentBuilder");
    ToolInstallation {
        executable: root.join("builder_linux").join("steamcmd.sh"),
        script_dir: root.join("scripts").join("depotctl"),
        build_output_dir: root.join("output"),
        log_dir: root.join("builder_linux").join("logs"),
        root,
    }
}
