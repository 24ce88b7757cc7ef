//! Console transport for a visible terminal window driven by keystrokes.
//!
//! Used where the tool cannot be piped. Lines are typed into the focused
//! window through OS automation and output is read back by tailing the
//! tool's own console log.

pub mod applescript;
pub mod powershell;

use crate::buffer::{OutputBuffer, TAIL_LINES};
use crate::transport::{ConsoleLauncher, ConsoleTransport};
use async_trait::async_trait;
use depotctl_core::installation::ToolInstallation;
use depotctl_core::{DepotError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

/// Identifies the window opened for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle(pub String);

/// OS automation primitives for one terminal application.
#[async_trait]
pub trait WindowAutomation: Send + Sync {
    /// Opens a terminal running `installation`'s executable.
    async fn open(&self, installation: &ToolInstallation) -> Result<WindowHandle>;

    /// Brings the window to the foreground; `Focus` error if it did not stick.
    async fn focus(&self, window: &WindowHandle) -> Result<()>;

    /// Types `line` followed by Enter into the focused window.
    ///
    /// Returns a `Focus` error if the window lost focus while typing.
    async fn type_line(&self, window: &WindowHandle, line: &str) -> Result<()>;

    async fn is_open(&self, window: &WindowHandle) -> bool;

    async fn close(&self, window: &WindowHandle) -> Result<()>;
}

/// The automation backend for the current platform, if there is one.
pub fn platform_automation() -> Option<Arc<dyn WindowAutomation>> {
    if cfg!(target_os = "macos") {
        Some(Arc::new(applescript::TerminalAutomation))
    } else if cfg!(target_os = "windows") {
        Some(Arc::new(powershell::ConsoleWindowAutomation))
    } else {
        None
    }
}

/// Launches the tool in a terminal window.
pub struct WindowLauncher {
    automation: Arc<dyn WindowAutomation>,
    poll_interval: Duration,
    startup_delay: Duration,
}

impl WindowLauncher {
    pub fn new(automation: Arc<dyn WindowAutomation>) -> Self {
        Self {
            automation,
            poll_interval: Duration::from_millis(250),
            startup_delay: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }
}

#[async_trait]
impl ConsoleLauncher for WindowLauncher {
    async fn launch(
        &self,
        installation: &ToolInstallation,
        output: OutputBuffer,
    ) -> Result<Arc<dyn ConsoleTransport>> {
        if !installation.executable.is_file() {
            return Err(DepotError::Launch(format!(
                "executable not found: {}",
                installation.executable.display()
            )));
        }

        // Only output written after launch belongs to this session
        let log_path = installation.console_log();
        let mut log = LogCursor::at_end(&log_path).await;

        let window = self.automation.open(installation).await?;
        tracing::info!(
            "[WindowTransport] Opened console window {} for {}",
            window.0,
            installation.executable.display()
        );
        tokio::time::sleep(self.startup_delay).await;

        // A tool that dies right away closes its window before the first command
        if !self.automation.is_open(&window).await {
            if let Ok(text) = log.read_new(&log_path).await {
                output.append(&text);
            }
            output.close();
            return Err(DepotError::Launch(format!(
                "console window {} closed right after start: {}",
                window.0,
                output.tail(TAIL_LINES)
            )));
        }

        let stop = CancellationToken::new();
        tokio::spawn(tail_log(
            log_path,
            log,
            output.clone(),
            self.automation.clone(),
            window.clone(),
            self.poll_interval,
            stop.clone(),
        ));

        Ok(Arc::new(FocusedWindowTransport {
            automation: self.automation.clone(),
            window,
            output,
            stop,
        }))
    }
}

/// Polls the console log and appends new bytes until the window closes.
async fn tail_log(
    path: PathBuf,
    mut log: LogCursor,
    output: OutputBuffer,
    automation: Arc<dyn WindowAutomation>,
    window: WindowHandle,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match log.read_new(&path).await {
            Ok(text) => output.append(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[WindowTransport] Reading {} failed: {}", path.display(), e),
        }

        if !automation.is_open(&window).await {
            // One last read for whatever was flushed on exit
            if let Ok(text) = log.read_new(&path).await {
                output.append(&text);
            }
            tracing::info!("[WindowTransport] Console window {} closed", window.0);
            break;
        }
    }
    output.close();
}

/// Leading bytes compared to notice a replaced log.
const LOG_HEAD_BYTES: u64 = 256;

/// Read position in the tool's console log.
///
/// The tool may truncate or recreate its log when it starts. The first bytes
/// of the file are remembered, and a log that no longer starts with them is
/// read again from the beginning, however long it already is.
#[derive(Debug, Clone, Default)]
struct LogCursor {
    offset: u64,
    head: Vec<u8>,
}

impl LogCursor {
    /// A cursor past everything the log holds now; empty if there is no log.
    async fn at_end(path: &Path) -> Self {
        let Ok(mut file) = tokio::fs::File::open(path).await else {
            return Self::default();
        };
        match read_head(&mut file).await {
            Ok((head, len)) => Self { offset: len, head },
            Err(_) => Self::default(),
        }
    }

    /// Text appended since the last read.
    async fn read_new(&mut self, path: &Path) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let (head, len) = read_head(&mut file).await?;

        let shared = head.len().min(self.head.len());
        if len < self.offset || head[..shared] != self.head[..shared] {
            tracing::debug!("[WindowTransport] {} was replaced, reading from the start", path.display());
            self.offset = 0;
        }
        self.head = head;

        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// The first bytes of `file` and its current length.
async fn read_head(file: &mut tokio::fs::File) -> std::io::Result<(Vec<u8>, u64)> {
    let len = file.metadata().await?.len();
    let mut head = vec![0u8; len.min(LOG_HEAD_BYTES) as usize];
    file.read_exact(&mut head).await?;
    Ok((head, len))
}

/// Sends lines as keystrokes into a focused window.
pub struct FocusedWindowTransport {
    automation: Arc<dyn WindowAutomation>,
    window: WindowHandle,
    output: OutputBuffer,
    stop: CancellationToken,
}

impl FocusedWindowTransport {
    async fn focus_and_type(&self, line: &str) -> Result<()> {
        self.automation.focus(&self.window).await?;
        self.automation.type_line(&self.window, line).await
    }
}

#[async_trait]
impl ConsoleTransport for FocusedWindowTransport {
    async fn send_line(&self, line: &str) -> Result<()> {
        match self.focus_and_type(line).await {
            Err(DepotError::Focus(reason)) => {
                tracing::warn!("[WindowTransport] Focus lost ({}), retrying once", reason);
                self.focus_and_type(line).await
            }
            other => other,
        }
    }

    async fn terminate(&self) -> Result<()> {
        self.stop.cancel();
        let result = if self.automation.is_open(&self.window).await {
            self.automation.close(&self.window).await
        } else {
            Ok(())
        };
        self.output.close();
        result
    }

    fn is_alive(&self) -> bool {
        !self.output.is_closed()
    }
}

/// Runs a helper program and returns its trimmed stdout.
pub(crate) async fn run_helper(program: &str, args: &[&str]) -> Result<String> {
    let out = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| DepotError::Launch(format!("failed to run {}: {}", program, e)))?;
    if !out.status.success() {
        return Err(DepotError::Launch(format!(
            "{} exited with {}: {}",
            program,
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loses focus on the first `focus_failures` attempts.
    struct FlakyAutomation {
        focus_failures: usize,
        focus_calls: AtomicUsize,
        typed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WindowAutomation for FlakyAutomation {
        async fn open(&self, _installation: &ToolInstallation) -> Result<WindowHandle> {
            Ok(WindowHandle("1".to_string()))
        }

        async fn focus(&self, _window: &WindowHandle) -> Result<()> {
            let n = self.focus_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.focus_failures {
                Err(DepotError::Focus("another window is frontmost".to_string()))
            } else {
                Ok(())
            }
        }

        async fn type_line(&self, _window: &WindowHandle, line: &str) -> Result<()> {
            self.typed.lock().unwrap().push(line.to_string());
            Ok(())
        }

        async fn is_open(&self, _window: &WindowHandle) -> bool {
            true
        }

        async fn close(&self, _window: &WindowHandle) -> Result<()> {
            Ok(())
        }
    }

    fn transport(focus_failures: usize) -> (FocusedWindowTransport, Arc<FlakyAutomation>) {
        let automation = Arc::new(FlakyAutomation {
            focus_failures,
            focus_calls: AtomicUsize::new(0),
            typed: Mutex::new(Vec::new()),
        });
        let transport = FocusedWindowTransport {
            automation: automation.clone(),
            window: WindowHandle("1".to_string()),
            output: OutputBuffer::new(),
            stop: CancellationToken::new(),
        };
        (transport, automation)
    }

    #[tokio::test]
    async fn test_focus_loss_is_retried_once() {
        let (transport, automation) = transport(1);
        transport.send_line("login anonymous").await.unwrap();
        assert_eq!(automation.focus_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*automation.typed.lock().unwrap(), vec!["login anonymous"]);
    }

    #[tokio::test]
    async fn test_second_focus_loss_fails() {
        let (transport, automation) = transport(2);
        let err = transport.send_line("quit").await.unwrap_err();
        assert!(matches!(err, DepotError::Focus(_)));
        assert!(automation.typed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_cursor_follows_appends_and_truncation() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("console_log.txt");
        std::fs::write(&path, "old session\n").unwrap();
        let mut log = LogCursor::at_end(&path).await;

        std::fs::write(&path, "old session\nSteam>").unwrap();
        assert_eq!(log.read_new(&path).await.unwrap(), "Steam>");
        assert_eq!(log.read_new(&path).await.unwrap(), "");

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(log.read_new(&path).await.unwrap(), "fresh\n");
    }

    #[tokio::test]
    async fn test_log_cursor_rereads_replaced_log_that_outgrew_old_one() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("console_log.txt");
        std::fs::write(&path, "[2026-10-18 09:00:00] old\n").unwrap();
        let mut log = LogCursor::at_end(&path).await;

        let fresh = "[2026-10-19 14:02:11] Loading Steam API...OK\n[2026-10-19 14:02:12] Steam>";
        std::fs::write(&path, fresh).unwrap();
        assert_eq!(log.read_new(&path).await.unwrap(), fresh);
    }

    /// A window whose tool writes `log_text` on open and stays open or not.
    struct ScriptedWindow {
        log_path: PathBuf,
        log_text: &'static str,
        stays_open: bool,
    }

    #[async_trait]
    impl WindowAutomation for ScriptedWindow {
        async fn open(&self, _installation: &ToolInstallation) -> Result<WindowHandle> {
            std::fs::write(&self.log_path, self.log_text).unwrap();
            Ok(WindowHandle("7".to_string()))
        }

        async fn focus(&self, _window: &WindowHandle) -> Result<()> {
            Ok(())
        }

        async fn type_line(&self, _window: &WindowHandle, _line: &str) -> Result<()> {
            Ok(())
        }

        async fn is_open(&self, _window: &WindowHandle) -> bool {
            self.stays_open
        }

        async fn close(&self, _window: &WindowHandle) -> Result<()> {
            Ok(())
        }
    }

    fn installation_in(temp_dir: &tempfile::TempDir) -> ToolInstallation {
        let root = temp_dir.path().to_path_buf();
        let executable = root.join("builder").join("steamcmd.sh");
        std::fs::create_dir_all(executable.parent().unwrap()).unwrap();
        std::fs::write(&executable, "#!/bin/sh\n").unwrap();
        let log_dir = root.join("builder").join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(log_dir.join("console_log.txt"), "previous run\n").unwrap();
        ToolInstallation {
            executable,
            script_dir: root.join("scripts"),
            build_output_dir: root.join("output"),
            log_dir,
            root,
        }
    }

    #[tokio::test]
    async fn test_window_closed_after_start_is_launch_failure() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let installation = installation_in(&temp_dir);
        let automation = Arc::new(ScriptedWindow {
            log_path: installation.console_log(),
            log_text: "previous run\nSteam needs to be online to update.\n",
            stays_open: false,
        });
        let launcher = WindowLauncher::new(automation).with_startup_delay(Duration::ZERO);

        let output = OutputBuffer::new();
        let err = match launcher.launch(&installation, output.clone()).await {
            Ok(_) => panic!("launch should fail"),
            Err(e) => e,
        };
        match err {
            DepotError::Launch(message) => {
                assert!(message.contains("needs to be online"));
                assert!(!message.contains("previous run"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(output.is_closed());
    }

    #[tokio::test]
    async fn test_window_launch_tails_fresh_log() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let installation = installation_in(&temp_dir);
        let automation = Arc::new(ScriptedWindow {
            log_path: installation.console_log(),
            log_text: "Steam Console Client (c) Valve Corporation\nLoading Steam API...OK\nSteam>",
            stays_open: true,
        });
        let launcher = WindowLauncher::new(automation)
            .with_startup_delay(Duration::ZERO)
            .with_poll_interval(Duration::from_millis(10));

        let output = OutputBuffer::new();
        let transport = launcher.launch(&installation, output.clone()).await.unwrap();
        let mut rx = output.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.len > 0))
            .await
            .unwrap()
            .unwrap();

        assert!(output.contents().starts_with("Steam Console Client"));
        transport.terminate().await.unwrap();
        assert!(!transport.is_alive());
    }
}
