//! Append-only console output buffer shared between the reader and waiters.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Number of lines kept in error tails.
pub const TAIL_LINES: usize = 20;

/// Tracing target for every line the tool prints.
pub const CONSOLE_TARGET: &str = "depotctl::console";

/// Change notification published after every append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferState {
    /// Total bytes appended so far.
    pub len: usize,
    /// No more output will arrive.
    pub closed: bool,
}

struct Inner {
    text: String,
    /// Incomplete trailing line, logged once it is terminated.
    partial: String,
}

/// Captured output of one console process.
///
/// A single reader appends; any number of waiters subscribe to changes and
/// scan from their own cursor. Cloning shares the same buffer.
#[derive(Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<BufferState>>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        let (state, _) = watch::channel(BufferState::default());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                text: String::new(),
                partial: String::new(),
            })),
            state: Arc::new(state),
        }
    }

    pub fn append(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let len = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.text.push_str(chunk);
            inner.partial.push_str(chunk);
            while let Some(pos) = inner.partial.find('\n') {
                let line: String = inner.partial.drain(..=pos).collect();
                log_line(&line);
            }
            inner.text.len()
        };
        self.state.send_modify(|s| s.len = len);
    }

    /// Marks the stream as finished. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.partial.is_empty() {
                let line = std::mem::take(&mut inner.partial);
                log_line(&line);
            }
        }
        self.state.send_modify(|s| s.closed = true);
    }

    pub fn subscribe(&self) -> watch::Receiver<BufferState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn len(&self) -> usize {
        self.state.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text from byte offset `from` to the current end, plus the closed flag.
    pub fn read_from(&self, from: usize) -> (String, bool) {
        let closed = self.is_closed();
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let text = inner.text.get(from..).unwrap_or_default().to_string();
        (text, closed)
    }

    /// The whole captured output.
    pub fn contents(&self) -> String {
        self.read_from(0).0
    }

    /// The last `lines` lines, verbatim.
    pub fn tail(&self, lines: usize) -> String {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        tail_lines(&inner.text, lines)
    }
}

fn log_line(line: &str) {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.is_empty() {
        tracing::info!(target: CONSOLE_TARGET, "{}", line);
    }
}

fn tail_lines(text: &str, lines: usize) -> String {
    if lines == 0 {
        return String::new();
    }
    let trimmed = text.trim_end_matches(['\r', '\n']);
    let mut start = trimmed.len();
    let mut seen = 0;
    while let Some(pos) = trimmed[..start].rfind('\n') {
        seen += 1;
        if seen == lines {
            return trimmed[pos + 1..].to_string();
        }
        start = pos;
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_last_lines() {
        let buffer = OutputBuffer::new();
        for i in 1..=30 {
            buffer.append(&format!("line {}\n", i));
        }
        let tail = buffer.tail(TAIL_LINES);
        assert_eq!(tail.lines().count(), 20);
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));

        assert_eq!(tail_lines("a\nb", 5), "a\nb");
        assert_eq!(tail_lines("a\nb\nc\n", 2), "b\nc");
    }

    #[test]
    fn test_read_from_cursor() {
        let buffer = OutputBuffer::new();
        buffer.append("Steam>");
        buffer.append("login anonymous\n");
        let (text, closed) = buffer.read_from(6);
        assert_eq!(text, "login anonymous\n");
        assert!(!closed);

        buffer.close();
        assert!(buffer.read_from(0).1);
        assert_eq!(buffer.read_from(1000).0, "");
    }

    #[tokio::test]
    async fn test_subscribers_see_appends() {
        let buffer = OutputBuffer::new();
        let mut rx = buffer.subscribe();
        buffer.append("hello");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len, 5);
    }
}
