//! Drives the external console tool: launching, login and operation tracking.

pub mod buffer;
pub mod credential_flow;
pub mod driver;
pub mod pipe;
pub mod scripted;
pub mod tracing_layer;
pub mod tracker;
pub mod transport;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;

pub use buffer::OutputBuffer;
pub use credential_flow::CredentialFlow;
pub use driver::{Session, SessionCloser, SessionDriver};
pub use pipe::PipeLauncher;
pub use scripted::ScriptedLauncher;
pub use tracing_layer::{ConsoleEventLayer, ConsoleLogEvent};
pub use tracker::OperationTracker;
pub use transport::{ConsoleLauncher, ConsoleTransport};
pub use window::{WindowLauncher, platform_automation};
