//! End-to-end flows against a scripted console.

use async_trait::async_trait;
use depotctl_core::credentials::{CodeRequest, Credentials, SecondFactorPrompt};
use depotctl_core::installation::ToolInstallation;
use depotctl_core::markers::ConsoleEvent;
use depotctl_core::operation::{FailureReason, OperationCommand};
use depotctl_core::session::SessionState;
use depotctl_core::{AuthFailure, DepotError};
use depotctl_execution::{CredentialFlow, OperationTracker, ScriptedLauncher, SessionDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

fn installation() -> ToolInstallation {
    let root = PathBuf::from("/opt/ContentBuilder");
    ToolInstallation {
        executable: root.join("builder_linux").join("steamcmd.sh"),
        script_dir: root.join("scripts").join("depotctl"),
        build_output_dir: root.join("output"),
        log_dir: root.join("builder_linux").join("logs"),
        root,
    }
}

/// Always answers with the same code and counts how often it was asked.
struct FixedCode {
    asked: AtomicU32,
    requests: std::sync::Mutex<Vec<CodeRequest>>,
}

impl FixedCode {
    fn new() -> Self {
        Self {
            asked: AtomicU32::new(0),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SecondFactorPrompt for FixedCode {
    async fn request_code(&self, request: CodeRequest) -> Option<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        Some("111111".to_string())
    }
}

#[tokio::test]
async fn test_second_factor_exhausted_after_three_prompts() {
    let launcher = ScriptedLauncher::new()
        .on("login", ["Logging in user '{1}' to Steam Public...\nTwo-factor code:"])
        .on("", ["Two-factor code mismatch\nTwo-factor code:"]);
    let mut session = SessionDriver::new(Arc::new(launcher.clone()))
        .start(&installation())
        .await
        .unwrap();
    let prompt = FixedCode::new();

    let err = CredentialFlow::new(&prompt, Duration::from_secs(2))
        .login(&mut session, &Credentials::account("builder", "pw"))
        .await
        .unwrap_err();

    assert_eq!(
        err.auth_failure(),
        Some(&AuthFailure::RetryExhausted { attempts: 3 })
    );
    assert_eq!(prompt.asked.load(Ordering::SeqCst), 3);

    let requests = prompt.requests.lock().unwrap();
    assert!(!requests[0].previous_rejected);
    assert!(requests[1].previous_rejected);
    assert_eq!(requests[2].attempt, 3);
    assert_eq!(session.state(), SessionState::Completed { success: false });

    // One login line and three codes; the password never appears in the tail
    assert_eq!(launcher.sent_lines().len(), 4);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_default_manifest_surfaces_detail() {
    let launcher = ScriptedLauncher::new()
        .on("login anonymous", ["Connecting anonymously to Steam Public...OK\nWaiting for user info...OK\n"])
        .on(
            "download_depot",
            ["Downloading depot 481 (480)...\nDepot download failed : Invalid default manifest (Missing configuration)\n"],
        );
    let mut session = SessionDriver::new(Arc::new(launcher))
        .start(&installation())
        .await
        .unwrap();
    let prompt = FixedCode::new();

    CredentialFlow::new(&prompt, Duration::from_secs(1))
        .login(&mut session, &Credentials::Anonymous)
        .await
        .unwrap();

    let command = OperationCommand::DownloadDepot {
        app_id: 480,
        depot_id: 481,
        manifest_id: None,
    };
    let err = OperationTracker::new(Duration::from_secs(1))
        .run(&mut session, Uuid::new_v4(), "spacewar", &command, None)
        .await
        .unwrap_err();

    match err {
        DepotError::OperationFailure { reason, detail, tail, .. } => {
            assert_eq!(reason, FailureReason::InvalidManifest);
            assert!(detail.contains("Invalid default manifest"));
            assert!(tail.contains("Downloading depot 481"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_close_from_another_task_cancels_wait() {
    let launcher = ScriptedLauncher::new();
    let mut session = SessionDriver::new(Arc::new(launcher.clone()))
        .start(&installation())
        .await
        .unwrap();
    let closer = session.closer();

    let abort = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close().await
    });

    let prompt = session.markers().select(&[ConsoleEvent::Prompt]);
    let err = session
        .await_pattern(&prompt, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "expected Cancelled, got {err:?}");
    abort.await.unwrap().unwrap();
    assert!(launcher.was_terminated());

    session.close().await.unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
    let launcher = ScriptedLauncher::new().fail_launch("steamcmd.sh: missing 32-bit runtime");
    let err = SessionDriver::new(Arc::new(launcher))
        .start(&installation())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DepotError::Launch(ref m) if m.contains("32-bit")));
}
