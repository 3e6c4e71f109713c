//! Per-run build log with a bounded ring buffer

use previewkit_common::{LogLine, LogSource};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    dropped: usize,
}

/// Append-only log shared by every task of one run.
///
/// Cloning yields another handle onto the same buffer. Once `capacity` lines
/// are held the oldest line is dropped for each new one.
#[derive(Clone)]
pub struct LogStream {
    inner: Arc<Mutex<LogBuffer>>,
    live: broadcast::Sender<LogLine>,
}

impl LogStream {
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(LogBuffer {
                lines: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                dropped: 0,
            })),
            live,
        }
    }

    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, line: LogLine) {
        tracing::trace!(source = ?line.source, text = %line.text, "log line");
        {
            let mut buffer = self.buffer();
            if buffer.lines.len() >= buffer.capacity {
                buffer.lines.pop_front();
                buffer.dropped += 1;
            }
            buffer.lines.push_back(line.clone());
        }
        let _ = self.live.send(line);
    }

    pub fn append_text(&self, source: LogSource, text: impl Into<String>) {
        self.append(LogLine::new(source, text));
    }

    pub fn system(&self, text: impl Into<String>) {
        self.append(LogLine::system(text));
    }

    /// Copy of every retained line, oldest first
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.buffer().lines.iter().cloned().collect()
    }

    /// Text of retained lines from `source`, joined with newlines
    pub fn combined_output(&self, source: LogSource) -> String {
        self.buffer()
            .lines
            .iter()
            .filter(|l| l.source == source)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self) {
        let mut buffer = self.buffer();
        buffer.lines.clear();
        buffer.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.buffer().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines evicted by the ring buffer since the last clear
    pub fn dropped(&self) -> usize {
        self.buffer().dropped
    }

    /// Receive lines as they are appended
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.live.subscribe()
    }
}
