//! Renders profiles into the build scripts the tool consumes.

use super::vdf::{self, VdfNode};
use depotctl_core::installation::ToolInstallation;
use depotctl_core::operation::{OperationCommand, OperationKind};
use depotctl_core::profile::Profile;
use depotctl_core::{DepotError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One rendered file, before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    pub file_name: String,
    pub contents: String,
}

/// Scripts written for one operation. Immutable once on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    /// Directory holding this operation's files.
    pub dir: PathBuf,
    /// The entry script referenced by the operation command.
    pub path: PathBuf,
    pub files: Vec<ScriptFile>,
}

impl GeneratedScript {
    pub fn main_contents(&self) -> &str {
        self.files
            .first()
            .map(|f| f.contents.as_str())
            .unwrap_or_default()
    }
}

/// Identifiers and paths recovered from a rendered script.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptSummary {
    pub app_id: u32,
    pub depot_id: u32,
    pub path: PathBuf,
    pub description: String,
    pub channel: Option<String>,
    pub manifest_id: Option<String>,
}

pub struct ScriptGenerator;

impl ScriptGenerator {
    /// Renders the files for `profile` without touching the filesystem.
    ///
    /// Identical inputs give byte-identical output; the entry script comes
    /// first and refers to its siblings by file name only.
    pub fn render(profile: &Profile, installation: &ToolInstallation) -> Result<Vec<ScriptFile>> {
        profile.validate()?;
        match profile.kind {
            OperationKind::Upload => Self::render_upload(profile, installation),
            OperationKind::Download => Self::render_download(profile),
        }
    }

    /// Renders and writes a fresh script set under
    /// `<script_dir>/<operation_id>/`.
    pub fn generate(
        profile: &Profile,
        installation: &ToolInstallation,
        operation_id: Uuid,
    ) -> Result<GeneratedScript> {
        let files = Self::render(profile, installation)?;
        let dir = installation.script_dir.join(operation_id.to_string());
        fs::create_dir_all(&dir).map_err(|e| DepotError::io_at(&dir, e))?;

        for file in &files {
            let path = dir.join(&file.file_name);
            fs::write(&path, file.contents.as_bytes()).map_err(|e| DepotError::io_at(&path, e))?;
        }

        let path = match files.first() {
            Some(entry) => dir.join(&entry.file_name),
            None => return Err(DepotError::internal("script renderer produced no files")),
        };

        tracing::info!(
            "[ScriptGenerator] Wrote {} script(s) for '{}' to {}",
            files.len(),
            profile.name,
            dir.display()
        );

        Ok(GeneratedScript {
            operation_id,
            kind: profile.kind,
            dir,
            path,
            files,
        })
    }

    /// The console command that runs `script` for `profile`.
    pub fn command(profile: &Profile, script: &GeneratedScript) -> OperationCommand {
        match profile.kind {
            OperationKind::Upload => OperationCommand::RunAppBuild {
                script_path: script.path.clone(),
            },
            OperationKind::Download => OperationCommand::DownloadDepot {
                app_id: profile.app_id,
                depot_id: profile.depot_id,
                manifest_id: profile.manifest_id.clone(),
            },
        }
    }

    fn description(profile: &Profile) -> String {
        if profile.description.is_empty() {
            format!("depotctl: {}", profile.name)
        } else {
            profile.description.clone()
        }
    }

    fn render_upload(profile: &Profile, installation: &ToolInstallation) -> Result<Vec<ScriptFile>> {
        let depot_file = format!("depot_build_{}.vdf", profile.depot_id);

        let app_build = VdfNode::block(
            "AppBuild",
            vec![
                VdfNode::string("AppID", profile.app_id.to_string()),
                VdfNode::string("Desc", Self::description(profile)),
                VdfNode::string("Preview", "0"),
                VdfNode::string("Local", ""),
                VdfNode::string("SetLive", profile.channel.clone().unwrap_or_default()),
                VdfNode::string("ContentRoot", native(&profile.path)),
                VdfNode::string("BuildOutput", native(&installation.build_output_dir)),
                VdfNode::block(
                    "Depots",
                    vec![VdfNode::string(profile.depot_id.to_string(), depot_file.clone())],
                ),
            ],
        );

        let depot_build = VdfNode::block(
            "DepotBuild",
            vec![
                VdfNode::string("DepotID", profile.depot_id.to_string()),
                VdfNode::block(
                    "FileMapping",
                    vec![
                        VdfNode::string("LocalPath", "*"),
                        VdfNode::string("DepotPath", "."),
                        VdfNode::string("Recursive", "1"),
                    ],
                ),
            ],
        );

        Ok(vec![
            ScriptFile {
                file_name: format!("app_build_{}.vdf", profile.app_id),
                contents: vdf::render(&app_build)?,
            },
            ScriptFile {
                file_name: depot_file,
                contents: vdf::render(&depot_build)?,
            },
        ])
    }

    fn render_download(profile: &Profile) -> Result<Vec<ScriptFile>> {
        let mut fields = vec![
            VdfNode::string("AppID", profile.app_id.to_string()),
            VdfNode::string("DepotID", profile.depot_id.to_string()),
        ];
        if let Some(manifest) = &profile.manifest_id {
            fields.push(VdfNode::string("ManifestID", manifest.clone()));
        }
        fields.push(VdfNode::string("Destination", native(&profile.path)));
        fields.push(VdfNode::string("Desc", Self::description(profile)));

        Ok(vec![ScriptFile {
            file_name: format!("depot_download_{}.vdf", profile.depot_id),
            contents: vdf::render(&VdfNode::block("DepotDownload", fields))?,
        }])
    }

    /// Recovers identifiers from rendered files (entry script first).
    pub fn parse(files: &[ScriptFile]) -> Result<ScriptSummary> {
        let entry = files
            .first()
            .ok_or_else(|| DepotError::validation("script", "no files to parse"))?;
        let root = vdf::parse(&entry.contents)?;

        let number = |node: &VdfNode, key: &str| -> Result<u32> {
            node.get_str(key)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| DepotError::validation(key, "missing or not a number"))
        };

        if root.key.eq_ignore_ascii_case("AppBuild") {
            let depot_entry = root
                .get("Depots")
                .and_then(|d| d.children().first())
                .ok_or_else(|| DepotError::validation("Depots", "no depot listed"))?;
            let depot_id = depot_entry
                .key
                .parse()
                .map_err(|_| DepotError::validation("Depots", "depot key is not a number"))?;
            let channel = root
                .get_str("SetLive")
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            Ok(ScriptSummary {
                app_id: number(&root, "AppID")?,
                depot_id,
                path: PathBuf::from(root.get_str("ContentRoot").unwrap_or_default()),
                description: root.get_str("Desc").unwrap_or_default().to_string(),
                channel,
                manifest_id: None,
            })
        } else if root.key.eq_ignore_ascii_case("DepotDownload") {
            Ok(ScriptSummary {
                app_id: number(&root, "AppID")?,
                depot_id: number(&root, "DepotID")?,
                path: PathBuf::from(root.get_str("Destination").unwrap_or_default()),
                description: root.get_str("Desc").unwrap_or_default().to_string(),
                channel: None,
                manifest_id: root.get_str("ManifestID").map(str::to_string),
            })
        } else {
            Err(DepotError::validation(
                "script",
                format!("unknown root block '{}'", root.key),
            ))
        }
    }
}

/// OS-native absolute rendering of a path.
fn native(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn installation(root: &Path) -> ToolInstallation {
        ToolInstallation {
            root: root.to_path_buf(),
            executable: root.join("builder_linux").join("steamcmd.sh"),
            script_dir: root.join("scripts").join("depotctl"),
            build_output_dir: root.join("output"),
            log_dir: root.join("builder_linux").join("logs"),
        }
    }

    #[test]
    fn test_upload_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let content = temp_dir.path().join("My Game").join("content");
        let profile = Profile::upload("nightly", 480, 481, &content)
            .with_channel("beta")
            .with_description("Nightly build");

        let files = ScriptGenerator::render(&profile, &installation(temp_dir.path())).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "app_build_480.vdf");
        assert!(files[1].contents.contains("\"DepotID\"\t\"481\""));

        let summary = ScriptGenerator::parse(&files).unwrap();
        assert_eq!(summary.app_id, 480);
        assert_eq!(summary.depot_id, 481);
        assert_eq!(summary.path, content);
        assert_eq!(summary.channel.as_deref(), Some("beta"));
        assert_eq!(summary.description, "Nightly build");
    }

    #[test]
    fn test_download_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let profile = Profile::download("old", 480, 481, temp_dir.path().join("dest"))
            .with_manifest("3183503801510301321");

        let files = ScriptGenerator::render(&profile, &installation(temp_dir.path())).unwrap();
        let summary = ScriptGenerator::parse(&files).unwrap();
        assert_eq!(summary.app_id, 480);
        assert_eq!(summary.depot_id, 481);
        assert_eq!(summary.manifest_id.as_deref(), Some("3183503801510301321"));
        assert_eq!(summary.path, temp_dir.path().join("dest"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let inst = installation(temp_dir.path());
        let profile = Profile::upload("nightly", 480, 481, temp_dir.path().join("content"));

        let a = ScriptGenerator::render(&profile, &inst).unwrap();
        let b = ScriptGenerator::render(&profile, &inst).unwrap();
        assert_eq!(a, b);
        assert!(a[0].contents.contains("depotctl: nightly"));
    }

    #[test]
    fn test_generate_writes_fresh_directory_per_operation() {
        let temp_dir = TempDir::new().unwrap();
        let inst = installation(temp_dir.path());
        let profile = Profile::upload("nightly", 480, 481, temp_dir.path().join("content"));

        let first = ScriptGenerator::generate(&profile, &inst, Uuid::new_v4()).unwrap();
        let second = ScriptGenerator::generate(&profile, &inst, Uuid::new_v4()).unwrap();

        assert_ne!(first.path, second.path);
        assert!(first.path.starts_with(&inst.script_dir));
        assert_eq!(
            fs::read_to_string(&first.path).unwrap(),
            fs::read_to_string(&second.path).unwrap()
        );
        assert!(first.dir.join("depot_build_481.vdf").exists());

        let cmd = ScriptGenerator::command(&profile, &first);
        assert_eq!(
            cmd,
            OperationCommand::RunAppBuild {
                script_path: first.path.clone()
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_script_dir_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut inst = installation(temp_dir.path());
        // A regular file where the script directory should be
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        inst.script_dir = blocker.join("scripts");

        let profile = Profile::upload("nightly", 480, 481, temp_dir.path().join("content"));
        let err = ScriptGenerator::generate(&profile, &inst, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DepotError::Io { path: Some(_), .. }));
    }
}
