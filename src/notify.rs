//! User-facing status log
//!
//! The coordinator reports connection and microphone changes as short,
//! timestamped lines. The console keeps the most recent lines and echoes new
//! ones only while it is shown.

use chrono::Local;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receiver of human-readable status updates
pub trait NotificationSink: Send + Sync {
    /// Append a line to the status log
    fn log(&self, message: &str);

    /// Replace the one-line connection/microphone summary
    fn update_summary(&self, connected: bool, active: bool);
}

/// Bounded ring of timestamped lines; oldest lines are dropped first
#[derive(Debug)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Stamp `message` with the local time, store it and return the stored line
    pub fn push(&self, message: &str) -> String {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.clone());
        line
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Summary shown by the `status` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub connected: bool,
    pub active: bool,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Peripheral: {} | Microphone: {}",
            if self.connected { "Connected" } else { "Disconnected" },
            if self.active { "Active" } else { "Inactive" }
        )
    }
}

/// Terminal status log with show/hide
#[derive(Debug)]
pub struct ConsoleSink {
    buffer: LogBuffer,
    visible: AtomicBool,
    summary: Mutex<Summary>,
}

impl ConsoleSink {
    pub fn new(max_lines: usize, visible: bool) -> Self {
        Self {
            buffer: LogBuffer::new(max_lines),
            visible: AtomicBool::new(visible),
            summary: Mutex::new(Summary::default()),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Start echoing, replaying the buffered lines first
    pub fn show(&self) {
        if !self.visible.swap(true, Ordering::SeqCst) {
            for line in self.buffer.lines() {
                println!("{}", line);
            }
        }
    }

    pub fn hide(&self) {
        self.visible.store(false, Ordering::SeqCst);
    }

    pub fn summary(&self) -> Summary {
        *self.summary.lock()
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer.lines()
    }

    /// Whether any buffered line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.buffer.lines().iter().any(|line| line.contains(needle))
    }
}

impl NotificationSink for ConsoleSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "micled::status", "{}", message);
        let line = self.buffer.push(message);
        if self.is_visible() {
            println!("{}", line);
        }
    }

    fn update_summary(&self, connected: bool, active: bool) {
        *self.summary.lock() = Summary { connected, active };
    }
}
