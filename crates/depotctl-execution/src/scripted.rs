//! Scripted console that stands in for the external tool.
//!
//! Used by tests and by the CLI's simulation mode. Each rule maps a command
//! prefix to a sequence of replies; the last reply repeats once the
//! sequence is used up.

use crate::buffer::{OutputBuffer, TAIL_LINES};
use crate::transport::{ConsoleLauncher, ConsoleTransport};
use async_trait::async_trait;
use depotctl_core::installation::ToolInstallation;
use depotctl_core::operation::OperationKind;
use depotctl_core::profile::Profile;
use depotctl_core::{DepotError, Result};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Exit(String),
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    replies: Vec<Reply>,
}

#[derive(Debug, Default)]
struct Record {
    sent: Vec<String>,
    launches: usize,
    terminated: bool,
}

/// Launcher for scripted consoles. Clones share the recorded traffic.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    banner: String,
    rules: Vec<Rule>,
    launch_error: Option<String>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output printed right after launch.
    pub fn banner(mut self, text: impl Into<String>) -> Self {
        self.banner = text.into();
        self
    }

    /// Replies to lines starting with `prefix`, one reply per line received.
    ///
    /// `{1}`, `{2}`, `{3}` in a reply expand to the received line's arguments.
    pub fn on<I, S>(mut self, prefix: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(Rule {
            prefix: prefix.into(),
            replies: replies.into_iter().map(|r| Reply::Output(r.into())).collect(),
        });
        self
    }

    /// Prints `text` and exits when a line starts with `prefix`.
    pub fn exit_on(mut self, prefix: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push(Rule {
            prefix: prefix.into(),
            replies: vec![Reply::Exit(text.into())],
        });
        self
    }

    /// Makes every launch fail.
    pub fn fail_launch(mut self, message: impl Into<String>) -> Self {
        self.launch_error = Some(message.into());
        self
    }

    /// Every line received so far, across launches.
    pub fn sent_lines(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.lock().launches
    }

    pub fn was_terminated(&self) -> bool {
        self.lock().terminated
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A console that plays a successful session for `profile`.
    ///
    /// Anonymous logins succeed immediately; account logins ask for a
    /// two-factor code and accept any code.
    pub fn simulate(profile: &Profile) -> Self {
        let ready = "Waiting for client config...OK\nWaiting for user info...OK\nSteam>";
        let operation_reply = match profile.kind {
            OperationKind::Upload => format!(
                "Building depot {depot}...\nUploading content...\n\
                 Successfully finished AppID {app} build (BuildID 1000001).\nSteam>",
                depot = profile.depot_id,
                app = profile.app_id,
            ),
            OperationKind::Download => format!(
                "Downloading depot {depot} ({app})...\n\
                 Depot download complete : \"{path}\" (3 files, manifest 1)\nSteam>",
                depot = profile.depot_id,
                app = profile.app_id,
                path = profile.path.display(),
            ),
        };
        let command = match profile.kind {
            OperationKind::Upload => "run_app_build",
            OperationKind::Download => "download_depot",
        };

        Self::new()
            .banner("Steam Console Client (c) Valve Corporation - simulated\n-- type 'quit' to exit --\nLoading Steam API...OK\n\nSteam>")
            .on(
                "login anonymous",
                [format!("Connecting anonymously to Steam Public...OK\n{}", ready)],
            )
            .on(
                "login",
                ["Logging in user '{1}' to Steam Public...\nTwo-factor code:"],
            )
            .on(command, [operation_reply])
            .exit_on("quit", "Unloading Steam API...OK\n")
            // Anything else is taken as the two-factor code
            .on("", [format!("OK\n{}", ready)])
    }
}

#[async_trait]
impl ConsoleLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        _installation: &ToolInstallation,
        output: OutputBuffer,
    ) -> Result<Arc<dyn ConsoleTransport>> {
        if let Some(message) = &self.launch_error {
            return Err(DepotError::Launch(message.clone()));
        }
        self.lock().launches += 1;
        output.append(&self.banner);

        Ok(Arc::new(ScriptedConsole {
            counters: Mutex::new(vec![0; self.rules.len()]),
            rules: self.rules.clone(),
            record: self.record.clone(),
            output,
        }))
    }
}

struct ScriptedConsole {
    rules: Vec<Rule>,
    counters: Mutex<Vec<usize>>,
    record: Arc<Mutex<Record>>,
    output: OutputBuffer,
}

impl ScriptedConsole {
    fn next_reply(&self, line: &str) -> Option<Reply> {
        let index = self
            .rules
            .iter()
            .position(|rule| line.starts_with(&rule.prefix))?;
        let rule = &self.rules[index];
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let n = counters[index].min(rule.replies.len().saturating_sub(1));
        counters[index] += 1;
        rule.replies.get(n).cloned()
    }
}

fn expand(template: &str, line: &str) -> String {
    let mut out = template.to_string();
    for (i, arg) in line.split_whitespace().enumerate().skip(1).take(3) {
        out = out.replace(&format!("{{{}}}", i), arg);
    }
    out
}

#[async_trait]
impl ConsoleTransport for ScriptedConsole {
    async fn send_line(&self, line: &str) -> Result<()> {
        if self.output.is_closed() {
            return Err(DepotError::ConsoleClosed {
                tail: self.output.tail(TAIL_LINES),
            });
        }
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sent
            .push(line.to_string());

        match self.next_reply(line) {
            Some(Reply::Output(text)) => self.output.append(&expand(&text, line)),
            Some(Reply::Exit(text)) => {
                self.output.append(&expand(&text, line));
                self.output.close();
            }
            None => {}
        }
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        self.record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .terminated = true;
        self.output.close();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.output.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_installation;

    #[tokio::test]
    async fn test_replies_advance_and_last_repeats() {
        let launcher = ScriptedLauncher::new().on("code", ["first\n", "second\n"]);
        let output = OutputBuffer::new();
        let console = launcher
            .launch(&fake_installation(), output.clone())
            .await
            .unwrap();

        for _ in 0..3 {
            console.send_line("code 1").await.unwrap();
        }
        assert_eq!(output.contents(), "first\nsecond\nsecond\n");
        assert_eq!(launcher.sent_lines().len(), 3);
    }

    #[tokio::test]
    async fn test_arguments_expand() {
        let launcher = ScriptedLauncher::new().on("login", ["user '{1}'\n"]);
        let output = OutputBuffer::new();
        let console = launcher
            .launch(&fake_installation(), output.clone())
            .await
            .unwrap();
        console.send_line("login builder secret").await.unwrap();
        assert_eq!(output.contents(), "user 'builder'\n");
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let launcher = ScriptedLauncher::new().fail_launch("missing runtime");
        let err = launcher
            .launch(&fake_installation(), OutputBuffer::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DepotError::Launch(_)));
    }
}
