//! Windows console automation through PowerShell.
//!
//! Lines go through the clipboard and a paste keystroke, so characters that
//! `SendKeys` treats as modifiers never need escaping.

use super::{WindowAutomation, WindowHandle, run_helper};
use async_trait::async_trait;
use depotctl_core::installation::ToolInstallation;
use depotctl_core::{DepotError, Result};

pub struct ConsoleWindowAutomation;

const USER32: &str = "Add-Type -Namespace Depotctl -Name User32 -MemberDefinition '\
[DllImport(\"user32.dll\")] public static extern bool SetForegroundWindow(System.IntPtr h);\
[DllImport(\"user32.dll\")] public static extern System.IntPtr GetForegroundWindow();';";

/// Quotes `value` as a single-quoted PowerShell string.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

async fn powershell(script: &str) -> Result<String> {
    run_helper(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-Command", script],
    )
    .await
}

fn focus_script(pid: &str) -> String {
    format!(
        "{USER32}\
         $p = Get-Process -Id {pid} -ErrorAction Stop;\
         [void][Depotctl.User32]::SetForegroundWindow($p.MainWindowHandle);\
         Start-Sleep -Milliseconds 100;\
         [Depotctl.User32]::GetForegroundWindow() -eq $p.MainWindowHandle"
    )
}

#[async_trait]
impl WindowAutomation for ConsoleWindowAutomation {
    async fn open(&self, installation: &ToolInstallation) -> Result<WindowHandle> {
        let script = format!(
            "$p = Start-Process -FilePath 'cmd.exe' -ArgumentList '/k', {exe} \
             -WorkingDirectory {dir} -PassThru; $p.Id",
            exe = quote(&format!("\"{}\"", installation.executable.display())),
            dir = quote(&installation.working_dir().display().to_string()),
        );
        let pid = powershell(&script).await?;
        if pid.parse::<u32>().is_err() {
            return Err(DepotError::Launch(format!(
                "unexpected process id from Start-Process: {}",
                pid
            )));
        }
        Ok(WindowHandle(pid))
    }

    async fn focus(&self, window: &WindowHandle) -> Result<()> {
        match powershell(&focus_script(&window.0)).await?.as_str() {
            "True" => Ok(()),
            _ => Err(DepotError::Focus(format!(
                "console window {} could not be brought to the foreground",
                window.0
            ))),
        }
    }

    async fn type_line(&self, window: &WindowHandle, line: &str) -> Result<()> {
        let script = format!(
            "Add-Type -AssemblyName System.Windows.Forms;\
             Set-Clipboard -Value {line};\
             {focus} | Out-Null;\
             [System.Windows.Forms.SendKeys]::SendWait('^v{{ENTER}}');\
             Set-Clipboard -Value $null;\
             [Depotctl.User32]::GetForegroundWindow() -eq (Get-Process -Id {pid}).MainWindowHandle",
            line = quote(line),
            focus = focus_script(&window.0),
            pid = window.0,
        );
        match powershell(&script).await?.as_str() {
            "True" => Ok(()),
            _ => Err(DepotError::Focus(format!(
                "console window {} lost focus while typing",
                window.0
            ))),
        }
    }

    async fn is_open(&self, window: &WindowHandle) -> bool {
        let script = format!(
            "[bool](Get-Process -Id {} -ErrorAction SilentlyContinue)",
            window.0
        );
        matches!(powershell(&script).await.as_deref(), Ok("True"))
    }

    async fn close(&self, window: &WindowHandle) -> Result<()> {
        run_helper("taskkill", &["/PID", &window.0, "/T", "/F"])
            .await
            .map(|_| ())
    }
}
