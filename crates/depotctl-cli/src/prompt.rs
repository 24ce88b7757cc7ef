//! Interactive prompts for passwords and second-factor codes.

use std::borrow::Cow::{self, Borrowed, Owned};

use async_trait::async_trait;
use colored::Colorize;
use depotctl_core::credentials::{CodeKind, CodeRequest, SecondFactorPrompt};
use rustyline::completion::Completer;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{ColorMode, Editor, Helper};

/// Renders typed characters as `*` while masking is on.
#[derive(Default)]
struct MaskingHelper {
    masking: bool,
}

impl Helper for MaskingHelper {}

impl Completer for MaskingHelper {
    type Candidate = String;
}

impl Hinter for MaskingHelper {
    type Hint = String;
}

impl Validator for MaskingHelper {}

impl Highlighter for MaskingHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if self.masking {
            Owned("*".repeat(line.chars().count()))
        } else {
            Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        self.masking
    }
}

/// Reads one line; `None` on Ctrl-C, Ctrl-D or a terminal error.
fn read_line(prompt: &str, masked: bool) -> Option<String> {
    let mut editor: Editor<MaskingHelper, rustyline::history::DefaultHistory> =
        Editor::new().ok()?;
    editor.set_helper(Some(MaskingHelper { masking: masked }));
    editor.set_auto_add_history(false);
    if masked {
        editor.set_color_mode(ColorMode::Forced);
    }

    match editor.readline(prompt) {
        Ok(line) => Some(line.trim().to_string()),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => None,
        Err(e) => {
            eprintln!("{}", format!("Input error: {}", e).red());
            None
        }
    }
}

/// Asks for the account password without echoing it.
pub async fn read_password(username: &str) -> Option<String> {
    let prompt = format!("Password for {}: ", username);
    tokio::task::spawn_blocking(move || read_line(&prompt, true))
        .await
        .ok()
        .flatten()
        .filter(|p| !p.is_empty())
}

/// Asks the terminal user for second-factor codes.
pub struct TerminalPrompt;

#[async_trait]
impl SecondFactorPrompt for TerminalPrompt {
    async fn request_code(&self, request: CodeRequest) -> Option<String> {
        if request.previous_rejected {
            println!("{}", "The previous code was rejected.".yellow());
        }
        let source = match request.kind {
            CodeKind::Authenticator => "your Steam Guard authenticator app",
            CodeKind::Email => "the Steam Guard email",
        };
        println!(
            "{}",
            format!(
                "Enter the code from {} (attempt {}/{}, Ctrl-C to abort)",
                source, request.attempt, request.max_attempts
            )
            .bright_yellow()
        );
        tokio::task::spawn_blocking(|| read_line("Code: ", false))
            .await
            .ok()
            .flatten()
    }

    async fn mobile_confirmation_pending(&self) {
        println!(
            "{}",
            "Confirm the login in the Steam Mobile app; waiting...".bright_yellow()
        );
    }
}
