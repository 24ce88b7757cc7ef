//! Console transport over a child process with piped standard streams.

use crate::buffer::{OutputBuffer, TAIL_LINES};
use crate::transport::{ConsoleLauncher, ConsoleTransport};
use async_trait::async_trait;
use depotctl_core::installation::ToolInstallation;
use depotctl_core::{DepotError, Result};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Launches the tool as a child process.
#[derive(Debug, Clone)]
pub struct PipeLauncher {
    extra_args: Vec<String>,
    launch_grace: Duration,
}

impl Default for PipeLauncher {
    fn default() -> Self {
        Self::new(Vec::new(), Duration::from_millis(500))
    }
}

impl PipeLauncher {
    pub fn new(extra_args: Vec<String>, launch_grace: Duration) -> Self {
        Self {
            extra_args,
            launch_grace,
        }
    }
}

#[async_trait]
impl ConsoleLauncher for PipeLauncher {
    async fn launch(
        &self,
        installation: &ToolInstallation,
        output: OutputBuffer,
    ) -> Result<Arc<dyn ConsoleTransport>> {
        let executable = &installation.executable;
        if !executable.is_file() {
            return Err(DepotError::Launch(format!(
                "executable not found: {}",
                executable.display()
            )));
        }

        tracing::info!(
            "[PipeTransport] Spawning {} in {}",
            executable.display(),
            installation.working_dir().display()
        );

        let mut cmd = Command::new(executable);
        cmd.args(&self.extra_args)
            .current_dir(installation.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            DepotError::Launch(format!("failed to start {}: {}", executable.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DepotError::Launch("child stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DepotError::Launch("child stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DepotError::Launch("child stderr was not captured".to_string()))?;

        let reader_buffer = output.clone();
        tokio::spawn(async move {
            let merger = StreamMerger::new(reader_buffer.clone());
            tokio::join!(
                pump_stdout(stdout, merger.clone()),
                pump_stderr(stderr, merger, STDERR_HOLD_LIMIT)
            );
            reader_buffer.close();
        });

        // A tool that dies right away (bad install, missing runtime) is a launch failure
        tokio::time::sleep(self.launch_grace).await;
        if let Ok(Some(status)) = child.try_wait() {
            // Give the readers a moment to drain what it printed
            let mut rx = output.subscribe();
            let _ = timeout(Duration::from_millis(200), rx.wait_for(|s| s.closed)).await;
            return Err(DepotError::Launch(format!(
                "{} exited immediately ({}): {}",
                executable.display(),
                status,
                output.tail(TAIL_LINES)
            )));
        }

        Ok(Arc::new(PipeTransport {
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(child),
            output,
        }))
    }
}

/// Longest time a stderr line waits for stdout to finish its current line.
const STDERR_HOLD_LIMIT: Duration = Duration::from_millis(50);

/// Merges stdout and stderr into one buffer.
///
/// Stdout is appended as it arrives. Stderr is appended a whole line at a
/// time and only while stdout is at the start of a line, so a stderr line
/// never lands inside a stdout line. Held lines are released anyway once the
/// stderr pump has waited long enough, since stdout sits mid-line at every
/// prompt.
#[derive(Clone)]
struct StreamMerger {
    buffer: OutputBuffer,
    state: Arc<std::sync::Mutex<MergeState>>,
}

#[derive(Default)]
struct MergeState {
    stdout_mid_line: bool,
    held: String,
}

impl StreamMerger {
    fn new(buffer: OutputBuffer) -> Self {
        Self {
            buffer,
            state: Arc::new(std::sync::Mutex::new(MergeState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MergeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stdout(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut state = self.lock();
        self.buffer.append(text);
        state.stdout_mid_line = !text.ends_with('\n');
        if !state.stdout_mid_line && !state.held.is_empty() {
            self.buffer.append(&std::mem::take(&mut state.held));
        }
    }

    /// Appends complete stderr lines, or holds them while stdout is mid-line.
    /// Returns whether anything is held.
    fn stderr_lines(&self, lines: &str) -> bool {
        let mut state = self.lock();
        if state.stdout_mid_line {
            state.held.push_str(lines);
        } else {
            self.buffer.append(lines);
        }
        !state.held.is_empty()
    }

    /// Appends held stderr lines followed by `rest`.
    fn release(&self, rest: &str) {
        let mut state = self.lock();
        self.buffer.append(&std::mem::take(&mut state.held));
        self.buffer.append(rest);
    }
}

/// Copies stdout into the merger until EOF.
async fn pump_stdout<R>(mut reader: R, merger: StreamMerger)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut carry: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => merger.stdout(&decode_utf8(&mut carry, &chunk[..n])),
            Err(e) => {
                tracing::warn!("[PipeTransport] Output stream read failed: {}", e);
                break;
            }
        }
    }
    if !carry.is_empty() {
        merger.stdout(&String::from_utf8_lossy(&carry));
    }
}

/// Copies stderr into the merger line by line until EOF.
async fn pump_stderr<R>(mut reader: R, merger: StreamMerger, hold_limit: Duration)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut carry: Vec<u8> = Vec::new();
    let mut lines = LineAssembler::default();
    let mut holding = false;
    loop {
        let read = if holding || lines.has_partial() {
            match timeout(hold_limit, reader.read(&mut chunk)).await {
                Ok(read) => read,
                Err(_) => {
                    merger.release(&lines.take_partial());
                    holding = false;
                    continue;
                }
            }
        } else {
            reader.read(&mut chunk).await
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let text = decode_utf8(&mut carry, &chunk[..n]);
                holding = merger.stderr_lines(&lines.push(&text));
            }
            Err(e) => {
                tracing::warn!("[PipeTransport] Error stream read failed: {}", e);
                break;
            }
        }
    }
    let mut rest = lines.take_partial();
    if !carry.is_empty() {
        rest.push_str(&String::from_utf8_lossy(&carry));
    }
    merger.release(&rest);
}

/// Holds back the unterminated end of a stream.
#[derive(Debug, Default)]
struct LineAssembler {
    partial: String,
}

impl LineAssembler {
    /// Adds `text` and returns every line it completed, terminators included.
    fn push(&mut self, text: &str) -> String {
        self.partial.push_str(text);
        match self.partial.rfind('\n') {
            Some(i) => {
                let rest = self.partial.split_off(i + 1);
                std::mem::replace(&mut self.partial, rest)
            }
            None => String::new(),
        }
    }

    fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    fn take_partial(&mut self) -> String {
        std::mem::take(&mut self.partial)
    }
}

/// Decodes `chunk`, holding back an incomplete trailing UTF-8 sequence.
fn decode_utf8(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    carry.extend_from_slice(chunk);
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let out = text.to_string();
            carry.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&carry[..valid]).into_owned();
            carry.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            out
        }
    }
}

pub struct PipeTransport {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
    output: OutputBuffer,
}

#[async_trait]
impl ConsoleTransport for PipeTransport {
    async fn send_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| DepotError::ConsoleClosed {
            tail: self.output.tail(TAIL_LINES),
        })?;

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                DepotError::ConsoleClosed {
                    tail: self.output.tail(TAIL_LINES),
                }
            } else {
                DepotError::from(e)
            }
        })
    }

    async fn terminate(&self) -> Result<()> {
        // Closing stdin first lets a well-behaved tool exit on EOF
        self.stdin.lock().await.take();
        let mut child = self.child.lock().await;
        terminate_then_kill(&mut child).await;
        self.output.close();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.output.is_closed()
    }
}

async fn terminate_then_kill(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status()
                .await;
        }
    }

    #[cfg(windows)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .status()
                .await;
        }
    }

    if timeout(Duration::from_millis(1500), child.wait()).await.is_ok() {
        return;
    }

    tracing::warn!("[PipeTransport] Tool ignored SIGTERM, killing");
    let _ = child.start_kill();
    let _ = timeout(Duration::from_secs(2), child.wait()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_holds_partial_sequence() {
        let mut carry = Vec::new();
        let bytes = "Größe".as_bytes();
        // Split inside the two-byte 'ö'
        let first = decode_utf8(&mut carry, &bytes[..3]);
        assert_eq!(first, "Gr");
        assert_eq!(carry.len(), 1);
        let rest = decode_utf8(&mut carry, &bytes[3..]);
        assert_eq!(rest, "öße");
        assert!(carry.is_empty());
    }

    #[test]
    fn test_line_assembler_releases_whole_lines() {
        let mut lines = LineAssembler::default();
        assert_eq!(lines.push("Building depot "), "");
        assert_eq!(lines.push("481...\nUploading"), "Building depot 481...\n");
        assert!(lines.has_partial());
        assert_eq!(lines.take_partial(), "Uploading");
        assert!(!lines.has_partial());
    }

    #[test]
    fn test_stderr_line_waits_for_stdout_line_end() {
        let buffer = OutputBuffer::new();
        let merger = StreamMerger::new(buffer.clone());

        merger.stdout("ERROR! Failed to commit build for AppID 480 ");
        assert!(merger.stderr_lines("warning: low disk space\n"));
        assert_eq!(buffer.contents(), "ERROR! Failed to commit build for AppID 480 ");

        merger.stdout(": Access Denied\n");
        assert_eq!(
            buffer.contents(),
            "ERROR! Failed to commit build for AppID 480 : Access Denied\nwarning: low disk space\n"
        );
        assert!(!merger.stderr_lines("another\n"));
        assert!(buffer.contents().ends_with("space\nanother\n"));
    }

    #[tokio::test]
    async fn test_stderr_released_while_stdout_waits_at_prompt() {
        let buffer = OutputBuffer::new();
        let merger = StreamMerger::new(buffer.clone());
        merger.stdout("Steam>");

        let (mut err_w, err_r) = tokio::io::duplex(64);
        let pumping = tokio::spawn(pump_stderr(err_r, merger, Duration::from_millis(20)));
        err_w.write_all(b"[S_API] SteamAPI_Init(): Loaded\n").await.unwrap();

        let mut rx = buffer.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.len > "Steam>".len()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buffer.contents(), "Steam>[S_API] SteamAPI_Init(): Loaded\n");

        drop(err_w);
        pumping.await.unwrap();
    }
}
