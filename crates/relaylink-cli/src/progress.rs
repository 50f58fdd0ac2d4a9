//! Spinner shown while relays are being contacted.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner for a connection attempt
pub struct AttemptProgress {
    bar: ProgressBar,
}

impl AttemptProgress {
    /// Start a spinner with `message`
    #[must_use]
    pub fn start(message: String) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Stop with a success message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Stop with a failure message
    pub fn abandon_with_message(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }
}

/// Format a duration with millisecond resolution
///
/// # Example
///
/// ```text
/// format_millis(Duration::from_millis(850))  == "850ms"
/// format_millis(Duration::from_millis(3333)) == "3.333s"
/// ```
#[must_use]
pub fn format_millis(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{}.{:03}s", ms / 1000, ms % 1000)
    }
}
