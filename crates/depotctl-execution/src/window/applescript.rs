//! macOS Terminal automation through `osascript`.

use super::{WindowAutomation, WindowHandle, run_helper};
use async_trait::async_trait;
use depotctl_core::installation::ToolInstallation;
use depotctl_core::{DepotError, Result};

pub struct TerminalAutomation;

/// Quotes `value` as an AppleScript string literal.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quotes `value` for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

async fn osascript(script: &str) -> Result<String> {
    run_helper("osascript", &["-e", script]).await
}

#[async_trait]
impl WindowAutomation for TerminalAutomation {
    async fn open(&self, installation: &ToolInstallation) -> Result<WindowHandle> {
        let command = format!(
            "cd {} && {}",
            shell_quote(&installation.working_dir().display().to_string()),
            shell_quote(&installation.executable.display().to_string())
        );
        let script = format!(
            "tell application \"Terminal\"\n\
             activate\n\
             set newTab to do script {}\n\
             return id of window 1\n\
             end tell",
            quote(&command)
        );
        let id = osascript(&script).await?;
        if id.is_empty() {
            return Err(DepotError::Launch(
                "Terminal did not report a window id".to_string(),
            ));
        }
        Ok(WindowHandle(id))
    }

    async fn focus(&self, window: &WindowHandle) -> Result<()> {
        let script = format!(
            "tell application \"Terminal\"\n\
             activate\n\
             set index of window id {id} to 1\n\
             end tell\n\
             tell application \"System Events\" to tell process \"Terminal\" to set frontmost to true\n\
             tell application \"Terminal\" to return (id of front window) = {id}",
            id = window.0
        );
        match osascript(&script).await?.as_str() {
            "true" => Ok(()),
            other => Err(DepotError::Focus(format!(
                "Terminal window {} is not frontmost ({})",
                window.0, other
            ))),
        }
    }

    async fn type_line(&self, window: &WindowHandle, line: &str) -> Result<()> {
        let script = format!(
            "tell application \"System Events\"\n\
             keystroke {}\n\
             key code 36\n\
             end tell\n\
             tell application \"Terminal\" to return (id of front window) = {}",
            quote(line),
            window.0
        );
        match osascript(&script).await?.as_str() {
            "true" => Ok(()),
            _ => Err(DepotError::Focus(format!(
                "Terminal window {} lost focus while typing",
                window.0
            ))),
        }
    }

    async fn is_open(&self, window: &WindowHandle) -> bool {
        let script = format!(
            "tell application \"Terminal\"\n\
             if not (exists window id {id}) then return false\n\
             return busy of selected tab of window id {id}\n\
             end tell",
            id = window.0
        );
        matches!(osascript(&script).await.as_deref(), Ok("true"))
    }

    async fn close(&self, window: &WindowHandle) -> Result<()> {
        let script = format!(
            "tell application \"Terminal\" to close window id {}",
            window.0
        );
        osascript(&script).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"say "hi" \ bye"#), r#""say \"hi\" \\ bye""#);
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
