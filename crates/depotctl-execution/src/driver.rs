//! Session Driver: owns one console process and serializes access to it.

use crate::buffer::{OutputBuffer, TAIL_LINES};
use crate::transport::{ConsoleLauncher, ConsoleTransport};
use depotctl_core::installation::ToolInstallation;
use depotctl_core::markers::{Marker, MarkerMatch, MarkerTable, find_first};
use depotctl_core::session::SessionState;
use depotctl_core::{DepotError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Starts sessions through a launcher.
#[derive(Clone)]
pub struct SessionDriver {
    launcher: Arc<dyn ConsoleLauncher>,
    markers: MarkerTable,
}

impl SessionDriver {
    pub fn new(launcher: Arc<dyn ConsoleLauncher>) -> Self {
        Self {
            launcher,
            markers: MarkerTable::default(),
        }
    }

    pub fn with_markers(mut self, markers: MarkerTable) -> Self {
        self.markers = markers;
        self
    }

    /// Spawns the tool and returns a session in the `Launching` state.
    pub async fn start(&self, installation: &ToolInstallation) -> Result<Session> {
        let id = Uuid::new_v4();
        let buffer = OutputBuffer::new();
        tracing::info!(
            session_id = %id,
            "[SessionDriver] Starting {}",
            installation.executable.display()
        );

        let transport = self.launcher.launch(installation, buffer.clone()).await?;

        Ok(Session {
            id,
            installation: installation.clone(),
            transport,
            buffer,
            cursor: 0,
            state: SessionState::Launching,
            cancel: CancellationToken::new(),
            markers: self.markers.clone(),
            listener: None,
        })
    }
}

/// One lifetime of a console process.
///
/// All I/O goes through `&mut self`, so lines are written in call order and
/// only one wait is outstanding at a time. Use `closer()` to abort from
/// another task.
pub struct Session {
    id: Uuid,
    installation: ToolInstallation,
    transport: Arc<dyn ConsoleTransport>,
    buffer: OutputBuffer,
    /// Output before this offset has already been matched.
    cursor: usize,
    state: SessionState,
    cancel: CancellationToken,
    markers: MarkerTable,
    listener: Option<mpsc::UnboundedSender<SessionState>>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn installation(&self) -> &ToolInstallation {
        &self.installation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn markers(&self) -> &MarkerTable {
        &self.markers
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.buffer
    }

    pub fn output_tail(&self) -> String {
        self.buffer.tail(TAIL_LINES)
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Receives every state change from now on.
    pub fn set_state_listener(&mut self, listener: mpsc::UnboundedSender<SessionState>) {
        self.listener = Some(listener);
    }

    pub fn set_state(&mut self, next: SessionState) -> Result<()> {
        let next = self.state.transition(next)?;
        if next != self.state {
            tracing::debug!(
                session_id = %self.id,
                "[SessionDriver] {} -> {}",
                self.state,
                next
            );
        }
        self.state = next;
        if let Some(listener) = &self.listener {
            let _ = listener.send(next);
        }
        Ok(())
    }

    /// Marks the session as failed unless it already ended.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.set_state(SessionState::Completed { success: false });
        }
    }

    fn check_usable(&self) -> Result<()> {
        if self.cancel.is_cancelled() || self.state == SessionState::Closed {
            return Err(DepotError::Cancelled {
                tail: self.output_tail(),
            });
        }
        Ok(())
    }

    /// Writes one line to the console.
    ///
    /// Output printed before the write is skipped by later waits, so a wait
    /// only sees what the command produced.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.check_usable()?;
        tracing::debug!(session_id = %self.id, "[SessionDriver] > {}", line);
        self.write(line).await
    }

    /// Writes a line that must never appear in logs.
    pub async fn send_secret_line(&mut self, line: &str, redacted: &str) -> Result<()> {
        self.check_usable()?;
        tracing::debug!(session_id = %self.id, "[SessionDriver] > {}", redacted);
        self.write(line).await
    }

    async fn write(&mut self, line: &str) -> Result<()> {
        let mark = self.buffer.len();
        self.transport.send_line(line).await?;
        self.cursor = self.cursor.max(mark);
        Ok(())
    }

    /// Waits until one of `markers` appears after the last match.
    ///
    /// Fails with `Cancelled` once the session is closed, `ConsoleClosed`
    /// if the tool exits first, and `Timeout` when `timeout` elapses.
    pub async fn await_pattern(
        &mut self,
        markers: &[Marker],
        timeout: Duration,
    ) -> Result<MarkerMatch> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut rx = self.buffer.subscribe();

        loop {
            if self.cancel.is_cancelled() {
                return Err(DepotError::Cancelled {
                    tail: self.output_tail(),
                });
            }

            rx.borrow_and_update();
            let (text, closed) = self.buffer.read_from(self.cursor);

            if let Some(found) = find_first(markers, &text, closed) {
                self.cursor += found.end;
                tracing::debug!(
                    session_id = %self.id,
                    event = ?found.event,
                    "[SessionDriver] Matched '{}'",
                    found.pattern
                );
                return Ok(found);
            }

            if closed {
                tracing::warn!(session_id = %self.id, "[SessionDriver] Console closed while waiting");
                return Err(DepotError::ConsoleClosed {
                    tail: self.output_tail(),
                });
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(DepotError::Cancelled { tail: self.output_tail() });
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(DepotError::ConsoleClosed { tail: self.output_tail() });
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(
                        session_id = %self.id,
                        "[SessionDriver] No marker within {} ms",
                        waited_ms
                    );
                    return Err(DepotError::Timeout { waited_ms, tail: self.output_tail() });
                }
            }
        }
    }

    /// A handle that can abort this session from another task.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            cancel: self.cancel.clone(),
            transport: self.transport.clone(),
        }
    }

    /// Terminates the process if still alive. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.cancel.cancel();
        let result = self.transport.terminate().await;
        self.set_state(SessionState::Closed)?;
        tracing::info!(session_id = %self.id, "[SessionDriver] Session closed");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Wakes any waiter; the pipe transport kills its child on drop
        self.cancel.cancel();
    }
}

/// Cloneable abort handle for a running session.
#[derive(Clone)]
pub struct SessionCloser {
    cancel: CancellationToken,
    transport: Arc<dyn ConsoleTransport>,
}

impl SessionCloser {
    /// Cancels any outstanding wait and terminates the process.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.transport.terminate().await
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedLauncher;
    use crate::test_support::fake_installation;
    use depotctl_core::markers::ConsoleEvent;

    #[tokio::test]
    async fn test_await_pattern_advances_cursor() {
        let launcher = ScriptedLauncher::new().on("echo", ["Steam>\nSteam>\n"]);
        let driver = SessionDriver::new(Arc::new(launcher));
        let mut session = driver.start(&fake_installation()).await.unwrap();

        let prompt = session.markers().select(&[ConsoleEvent::Prompt]);
        session.send_line("echo").await.unwrap();
        session
            .await_pattern(&prompt, Duration::from_secs(1))
            .await
            .unwrap();
        session
            .await_pattern(&prompt, Duration::from_secs(1))
            .await
            .unwrap();

        // Both prompts consumed; the third wait must time out rather than hang
        let err = session
            .await_pattern(&prompt, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_send_skips_output_printed_before_the_command() {
        let launcher = ScriptedLauncher::new()
            .banner("Loading Steam API...OK\n\nSteam>")
            .on("run_app_build", ["Successfully finished AppID 480 build (BuildID 1).\nSteam>"])
            .exit_on("quit", "Unloading Steam API...OK\n");
        let driver = SessionDriver::new(Arc::new(launcher));
        let mut session = driver.start(&fake_installation()).await.unwrap();

        let build = session.markers().select(&[ConsoleEvent::BuildSucceeded]);
        session.send_line("run_app_build /s/app.vdf").await.unwrap();
        session
            .await_pattern(&build, Duration::from_secs(1))
            .await
            .unwrap();

        // The prompt after the build is older than the quit
        session.send_line("quit").await.unwrap();
        let prompt = session.markers().select(&[ConsoleEvent::Prompt]);
        let err = session
            .await_pattern(&prompt, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::ConsoleClosed { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let launcher = ScriptedLauncher::new();
        let driver = SessionDriver::new(Arc::new(launcher.clone()));
        let mut session = driver.start(&fake_installation()).await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(launcher.was_terminated());
        assert!(session.send_line("quit").await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_console_exit_is_distinct_from_timeout() {
        let launcher = ScriptedLauncher::new().exit_on("quit", "Unloading Steam API...OK\n");
        let driver = SessionDriver::new(Arc::new(launcher));
        let mut session = driver.start(&fake_installation()).await.unwrap();

        session.send_line("quit").await.unwrap();
        let prompt = session.markers().select(&[ConsoleEvent::Prompt]);
        let err = session
            .await_pattern(&prompt, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::ConsoleClosed { ref tail } if tail.contains("Unloading")));
    }

    #[tokio::test]
    async fn test_state_listener_sees_transitions() {
        let driver = SessionDriver::new(Arc::new(ScriptedLauncher::new()));
        let mut session = driver.start(&fake_installation()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_state_listener(tx);

        session.set_state(SessionState::AwaitingLogin).unwrap();
        assert!(session.set_state(SessionState::RunningOperation).is_err());
        session.close().await.unwrap();

        assert_eq!(rx.recv().await, Some(SessionState::AwaitingLogin));
        assert_eq!(rx.recv().await, Some(SessionState::Closed));
    }
}
