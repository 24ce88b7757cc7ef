//! Operation model: what gets launched against the external tool and how it ended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::session::SessionState;

/// The two recurring operations a profile can describe.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OperationKind {
    Upload,
    Download,
}

/// Classified sub-reason attached to an explicit failure marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    InvalidManifest,
    MissingAppInfo,
    NoSubscription,
    AccessDenied,
    NotLoggedOn,
    InvalidBuildScript,
    ContentNotFound,
    Unclassified,
}

impl FailureReason {
    /// Classifies the diagnostic suffix that follows a failure marker.
    ///
    /// Matching is case-insensitive and keyword based; unknown wording falls
    /// back to `Unclassified` while the raw text is still kept by the caller.
    pub fn classify(detail: &str) -> Self {
        let lower = detail.to_ascii_lowercase();
        if lower.contains("manifest") {
            Self::InvalidManifest
        } else if lower.contains("missing app info") || lower.contains("no app info") {
            Self::MissingAppInfo
        } else if lower.contains("no subscription") {
            Self::NoSubscription
        } else if lower.contains("access denied") || lower.contains("permission") {
            Self::AccessDenied
        } else if lower.contains("not logged on") || lower.contains("not logged in") {
            Self::NotLoggedOn
        } else if lower.contains("build script") || lower.contains("load app build") {
            Self::InvalidBuildScript
        } else if lower.contains("content root") || lower.contains("file not found") {
            Self::ContentNotFound
        } else {
            Self::Unclassified
        }
    }
}

/// Terminal outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { reason: FailureReason },
    TimedOut,
    Cancelled,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed { .. } => "failed",
            Outcome::TimedOut => "timed_out",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// Immutable record of a finished operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub id: Uuid,
    pub kind: OperationKind,
    pub profile_name: String,
    pub outcome: Outcome,
    /// Verbatim diagnostic text: the marker line plus the console tail.
    pub diagnostic: String,
    /// Build id reported by a successful upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<u64>,
    /// Where downloaded content ended up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

/// The console command that starts an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationCommand {
    RunAppBuild {
        script_path: PathBuf,
    },
    DownloadDepot {
        app_id: u32,
        depot_id: u32,
        manifest_id: Option<String>,
    },
}

impl OperationCommand {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationCommand::RunAppBuild { .. } => OperationKind::Upload,
            OperationCommand::DownloadDepot { .. } => OperationKind::Download,
        }
    }

    /// Renders the single console line sent to the tool.
    pub fn to_console_line(&self) -> String {
        match self {
            OperationCommand::RunAppBuild { script_path } => {
                format!(
                    "run_app_build {}",
                    quote_console_arg(&script_path.to_string_lossy())
                )
            }
            OperationCommand::DownloadDepot {
                app_id,
                depot_id,
                manifest_id,
            } => match manifest_id {
                Some(manifest) => format!("download_depot {} {} {}", app_id, depot_id, manifest),
                None => format!("download_depot {} {}", app_id, depot_id),
            },
        }
    }
}

/// Quotes a console argument when it contains whitespace.
///
/// The tool splits its command line on whitespace and honours double quotes,
/// with no escape syntax inside them.
pub fn quote_console_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

/// Asynchronous notifications surfaced to the UI while an operation runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEvent {
    StateChanged {
        operation_id: Uuid,
        state: SessionState,
    },
    ScriptGenerated {
        operation_id: Uuid,
        path: PathBuf,
    },
    SecondFactorRequested {
        operation_id: Uuid,
        attempt: u32,
    },
    MobileConfirmationPending {
        operation_id: Uuid,
    },
    Progress {
        operation_id: Uuid,
        message: String,
    },
    Warning {
        operation_id: Option<Uuid>,
        message: String,
    },
    Finished {
        result: OperationResult,
    },
    Failed {
        operation_id: Uuid,
        error: crate::DepotError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_classify_manifest_failure() {
        let reason = FailureReason::classify("Invalid default manifest (Missing configuration)");
        assert_eq!(reason, FailureReason::InvalidManifest);
        assert_eq!(
            FailureReason::classify("Missing app info"),
            FailureReason::MissingAppInfo
        );
        assert_eq!(
            FailureReason::classify("something new"),
            FailureReason::Unclassified
        );
    }

    #[test]
    fn test_download_command_line() {
        let cmd = OperationCommand::DownloadDepot {
            app_id: 480,
            depot_id: 481,
            manifest_id: Some("3183503801510301321".to_string()),
        };
        assert_eq!(
            cmd.to_console_line(),
            "download_depot 480 481 3183503801510301321"
        );

        let cmd = OperationCommand::DownloadDepot {
            app_id: 480,
            depot_id: 481,
            manifest_id: None,
        };
        assert_eq!(cmd.to_console_line(), "download_depot 480 481");
    }

    #[test]
    fn test_run_app_build_quotes_whitespace() {
        let cmd = OperationCommand::RunAppBuild {
            script_path: PathBuf::from("/opt/Content Builder/scripts/app_build_480.vdf"),
        };
        assert_eq!(
            cmd.to_console_line(),
            "run_app_build \"/opt/Content Builder/scripts/app_build_480.vdf\""
        );
        assert_eq!(cmd.kind(), OperationKind::Upload);
    }

    #[test]
    fn test_operation_kind_parsing() {
        assert_eq!(OperationKind::from_str("upload").unwrap(), OperationKind::Upload);
        assert_eq!(
            OperationKind::from_str("Download").unwrap(),
            OperationKind::Download
        );
        assert_eq!(OperationKind::Upload.to_string(), "upload");
    }
}
