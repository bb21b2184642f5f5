// src/commands/progress.rs
//! Terminal progress bar for shard conversion

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tsm_migrate::ProgressTracker;

/// Overall bar over the shards of a run, with the current step as message
pub struct ConversionProgress {
    bar: ProgressBar,
}

impl ConversionProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/dim}] {pos}/{len} shards {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl Default for ConversionProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker for ConversionProgress {
    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn increment(&self, amount: u64) {
        self.bar.inc(amount);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(format!("[FAILED] {message}"));
    }
}
