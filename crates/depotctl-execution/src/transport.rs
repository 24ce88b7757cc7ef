//! Capability interface between the session logic and a concrete console.

use crate::buffer::OutputBuffer;
use async_trait::async_trait;
use depotctl_core::Result;
use depotctl_core::installation::ToolInstallation;
use std::sync::Arc;

/// A running console that accepts lines and feeds an `OutputBuffer`.
///
/// Implementations append everything the tool prints to the buffer they
/// were launched with and close it once the tool is gone.
#[async_trait]
pub trait ConsoleTransport: Send + Sync {
    /// Writes one line. Returns only after the bytes were handed to the tool.
    async fn send_line(&self, line: &str) -> Result<()>;

    /// Stops the tool if it is still running. Idempotent.
    async fn terminate(&self) -> Result<()>;

    fn is_alive(&self) -> bool;
}

/// Starts consoles for a tool installation.
#[async_trait]
pub trait ConsoleLauncher: Send + Sync {
    async fn launch(
        &self,
        installation: &ToolInstallation,
        output: OutputBuffer,
    ) -> Result<Arc<dyn ConsoleTransport>>;
}
