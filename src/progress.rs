// src/progress.rs

//! Progress reporting for migration runs
//!
//! The migrator reports through the [`ProgressTracker`] trait so that the
//! library stays free of terminal concerns. Implementations:
//! - `LogProgress`: writes milestones to tracing
//! - `SilentProgress`: counts, never prints (tests, scripted use)
//!
//! The CLI supplies an indicatif bar of its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Receives progress updates from a migration run
///
/// Shards may finish on several worker threads, so implementations must be
/// thread-safe.
pub trait ProgressTracker: Send + Sync {
    /// Set the number of shards to convert
    fn set_length(&self, length: u64);

    /// Describe the work currently in flight
    fn set_message(&self, message: &str);

    /// Record `amount` shards as done
    fn increment(&self, amount: u64);

    /// Shards done so far
    fn position(&self) -> u64;

    fn finish_with_message(&self, message: &str);

    fn finish_with_error(&self, message: &str);
}

/// Tracker that only counts
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

impl ProgressTracker for SilentProgress {
    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.position.fetch_add(amount, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn finish_with_error(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Tracker that logs each step at info level
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicU64,
    length: AtomicU64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: AtomicU64::new(0),
            length: AtomicU64::new(0),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let done = self.position.fetch_add(amount, Ordering::Relaxed) + amount;
        let length = self.length.load(Ordering::Relaxed);
        if length > 0 {
            info!("{}: {}/{} shards ({}%)", self.name, done, length, done * 100 / length);
        } else {
            info!("{}: {} shards", self.name, done);
        }
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        warn!("{}: {}", self.name, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_progress_counts() {
        let progress = SilentProgress::new();
        progress.set_length(3);
        progress.increment(1);
        progress.increment(2);
        assert_eq!(progress.position(), 3);
        assert_eq!(progress.length(), 3);
        assert!(!progress.is_finished());
        progress.finish_with_message("done");
        assert!(progress.is_finished());
    }

    #[test]
    fn test_log_progress_position() {
        let progress = LogProgress::new("Converting");
        progress.increment(1);
        progress.set_length(4);
        progress.increment(1);
        assert_eq!(progress.position(), 2);
    }
}
