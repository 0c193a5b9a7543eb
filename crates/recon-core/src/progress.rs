//! Progress reporting capability.
//!
//! The pipeline reports `(percent, message)` at stage boundaries; the
//! worker backs this with heartbeat publishing, tests use the no-op.

use std::fmt::Debug;

/// Receives progress updates from a running pipeline.
///
/// Updates are best-effort; implementations must not block the
/// pipeline on delivery failures.
pub trait ProgressSink: Send + Sync + Debug {
    fn update(&self, percent: u8, message: &str);
}

/// Discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn update(&self, _percent: u8, _message: &str) {}
}

/// Records updates in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    updates: std::sync::Mutex<Vec<(u8, String)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(u8, String)> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn update(&self, percent: u8, message: &str) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push((percent, message.to_string()));
        }
    }
}
