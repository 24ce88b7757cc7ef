//! Operation Tracker: issues the operation command and classifies its outcome.

use crate::driver::Session;
use chrono::Utc;
use depotctl_core::markers::{ConsoleEvent, MarkerMatch, parse_build_id, parse_quoted_path};
use depotctl_core::operation::{
    FailureReason, OperationCommand, OperationKind, OperationResult, Outcome,
};
use depotctl_core::session::SessionState;
use depotctl_core::{DepotError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Runs one operation on an authenticated session.
pub struct OperationTracker {
    timeout: Duration,
    progress: Option<mpsc::UnboundedSender<String>>,
}

impl OperationTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            progress: None,
        }
    }

    /// Forwards progress lines ("Building depot ...") while the operation runs.
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<String>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn events_for(kind: OperationKind) -> &'static [ConsoleEvent] {
        match kind {
            OperationKind::Upload => &[
                ConsoleEvent::Progress,
                ConsoleEvent::BuildSucceeded,
                ConsoleEvent::BuildFailed,
            ],
            OperationKind::Download => &[
                ConsoleEvent::Progress,
                ConsoleEvent::DownloadSucceeded,
                ConsoleEvent::DownloadFailed,
                ConsoleEvent::BuildFailed,
            ],
        }
    }

    /// Sends `command` and waits for a terminal marker.
    ///
    /// An explicit failure marker becomes `OperationFailure` with the text
    /// after the marker kept verbatim. `destination`, when given, is where a
    /// download should end up.
    pub async fn run(
        &self,
        session: &mut Session,
        operation_id: Uuid,
        profile_name: &str,
        command: &OperationCommand,
        destination: Option<&Path>,
    ) -> Result<OperationResult> {
        let result = self
            .track(session, operation_id, profile_name, command, destination)
            .await;
        match &result {
            Ok(r) => {
                tracing::info!(
                    operation_id = %operation_id,
                    "[OperationTracker] {} '{}' finished: {}",
                    r.kind,
                    profile_name,
                    r.outcome.label()
                );
                session.set_state(SessionState::Completed { success: true })?;
            }
            Err(e) => {
                tracing::warn!(
                    operation_id = %operation_id,
                    "[OperationTracker] {} '{}' failed: {}",
                    command.kind(),
                    profile_name,
                    e
                );
                session.fail();
            }
        }
        result
    }

    async fn track(
        &self,
        session: &mut Session,
        operation_id: Uuid,
        profile_name: &str,
        command: &OperationCommand,
        destination: Option<&Path>,
    ) -> Result<OperationResult> {
        let kind = command.kind();
        session.set_state(SessionState::RunningOperation)?;
        session.send_line(&command.to_console_line()).await?;

        let markers = session.markers().select(Self::events_for(kind));
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let found = session.await_pattern(&markers, remaining).await?;

            match found.event {
                ConsoleEvent::Progress => {
                    tracing::info!(operation_id = %operation_id, "[OperationTracker] {}", found.line);
                    if let Some(progress) = &self.progress {
                        let _ = progress.send(found.line.clone());
                    }
                }
                ConsoleEvent::BuildSucceeded => {
                    return Ok(OperationResult {
                        id: operation_id,
                        kind,
                        profile_name: profile_name.to_string(),
                        outcome: Outcome::Succeeded,
                        build_id: parse_build_id(&found.line),
                        diagnostic: found.line,
                        output_path: None,
                        finished_at: Utc::now(),
                    });
                }
                ConsoleEvent::DownloadSucceeded => {
                    let (output_path, diagnostic) =
                        self.finish_download(session, &found, destination).await;
                    return Ok(OperationResult {
                        id: operation_id,
                        kind,
                        profile_name: profile_name.to_string(),
                        outcome: Outcome::Succeeded,
                        diagnostic,
                        build_id: None,
                        output_path,
                        finished_at: Utc::now(),
                    });
                }
                ConsoleEvent::BuildFailed | ConsoleEvent::DownloadFailed => {
                    let detail = if found.suffix.is_empty() {
                        found.line.clone()
                    } else {
                        found.suffix.clone()
                    };
                    return Err(DepotError::OperationFailure {
                        kind,
                        reason: FailureReason::classify(&detail),
                        detail,
                        tail: session.output_tail(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Locates the downloaded depot and moves it into `destination`.
    async fn finish_download(
        &self,
        session: &Session,
        found: &MarkerMatch,
        destination: Option<&Path>,
    ) -> (Option<PathBuf>, String) {
        let Some(reported) = parse_quoted_path(&found.suffix) else {
            return (destination.map(Path::to_path_buf), found.line.clone());
        };
        let mut source = PathBuf::from(reported);
        if source.is_relative() {
            source = session.installation().working_dir().join(source);
        }

        let Some(destination) = destination else {
            return (Some(source), found.line.clone());
        };

        match relocate(&source, destination).await {
            Ok(path) => (Some(path), found.line.clone()),
            Err(message) => {
                tracing::warn!("[OperationTracker] {}", message);
                (Some(source), format!("{}\n{}", found.line, message))
            }
        }
    }
}

/// Moves `source` into `destination`, keeping its folder name.
///
/// A source that already is (or is inside) the destination stays put.
pub async fn relocate(source: &Path, destination: &Path) -> std::result::Result<PathBuf, String> {
    if source == destination || source.starts_with(destination) {
        return Ok(source.to_path_buf());
    }
    let name = source
        .file_name()
        .ok_or_else(|| format!("download path has no folder name: {}", source.display()))?;
    let target = destination.join(name);
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        return Err(format!(
            "could not move download: {} already exists",
            target.display()
        ));
    }

    let moved = async {
        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::rename(source, &target).await
    }
    .await;
    moved.map_err(|e| {
        format!(
            "could not move download from {} to {}: {}",
            source.display(),
            target.display(),
            e
        )
    })?;
    tracing::info!(
        "[OperationTracker] Moved download to {}",
        target.display()
    );
    Ok(target)
}
