//! Log setup: stderr, a daily rolling file, and the live console mirror.

use depotctl_execution::buffer::CONSOLE_TARGET;
use depotctl_execution::{ConsoleEventLayer, ConsoleLogEvent};
use std::path::Path;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Filter for stderr: `DEPOTCTL_LOG`, then `RUST_LOG`, then `warn`.
///
/// Console lines are excluded; the mirror prints those.
fn stderr_filter(verbose: bool) -> EnvFilter {
    let level = std::env::var("DEPOTCTL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| if verbose { "info" } else { "warn" }.to_string());
    EnvFilter::try_new(format!("{},{}=off", level, CONSOLE_TARGET))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Installs the global subscriber.
///
/// The file log always records console output at `info`, so a failed run
/// can be diagnosed afterwards. The returned guard flushes the file on drop.
pub fn init(
    logs_dir: &Path,
    verbose: bool,
    console: mpsc::UnboundedSender<ConsoleLogEvent>,
) -> Option<WorkerGuard> {
    let file = match std::fs::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(logs_dir, "depotctl.log");
            Some(tracing_appender::non_blocking(appender))
        }
        Err(e) => {
            eprintln!("warning: file logging disabled ({}): {}", logs_dir.display(), e);
            None
        }
    };
    let (file_writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter(verbose));

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(EnvFilter::new("info"))
    });

    let console_layer = ConsoleEventLayer::new(console)
        .with_filter(filter_fn(|meta| meta.target() == CONSOLE_TARGET));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}
