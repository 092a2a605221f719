//! # Progress Display Module
//!
//! Questo modulo gestisce la visualizzazione del progresso di un job nel terminale.
//!
//! ## Responsabilità:
//! - Progress bar visual con `indicatif` per feedback real-time
//! - Messaggio di stato aggiornato ad ogni transizione del job
//! - Report finale con dimensioni e percentuale di riduzione
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:12] [========================>---------------] 60% running: clip.mp4
//! ```

use crate::job::{CompressionResult, JobState};
use crate::media::format_size;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_LENGTH: u64 = 100;

/// Manages the progress bar of one compression job
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
    name: String,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(BAR_LENGTH);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            name: name.to_string(),
        }
    }

    /// Hidden bar, for when stdout carries JSON
    pub fn hidden(name: &str) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            name: name.to_string(),
        }
    }

    /// Set overall progress, `ratio` in `[0, 1]`
    pub fn set_ratio(&self, ratio: f64) {
        self.bar.set_position((ratio.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64);
    }

    pub fn set_state(&self, state: JobState) {
        self.bar.set_message(format!("{}: {}", state_label(state), self.name));
    }

    /// Stop redrawing so the terminal can be used, e.g. for a prompt
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}

fn state_label(state: JobState) -> &'static str {
    match state {
        JobState::Validating => "validating",
        JobState::AwaitingUserConfirmation => "waiting for confirmation",
        JobState::Routing => "preparing",
        JobState::Running => "compressing",
        JobState::Succeeded => "done",
        JobState::Failed => "failed",
        JobState::CancelledByUser => "cancelled",
    }
}

/// One-line summary of a finished job
pub fn format_summary(result: &CompressionResult) -> String {
    if !result.was_compressed() {
        return format!(
            "✅ {}: {} (no compression needed)",
            result.name,
            format_size(result.original_byte_size)
        );
    }
    format!(
        "✅ {}: {} -> {} ({:.1}% saved)",
        result.name,
        format_size(result.original_byte_size),
        format_size(result.compressed_byte_size),
        result.reduction_percent()
    )
}
