//! Terminal rendering of pipeline output.
//!
//! Status lines go to stdout. Transfers get an `indicatif` bar that is
//! cleared once the transfer ends, so the next status line starts clean.

use std::sync::{Mutex, MutexGuard};

use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use xcodes::download::TransferProgress;
use xcodes::output::OutputSink;

const BAR_TEMPLATE: &str = "{msg}\n[{bar:40.cyan/blue}] {percent:>3}% {prefix}";

/// [`OutputSink`] that draws on the terminal.
#[derive(Default)]
pub struct TerminalOutput {
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn new_bar(label: &str) -> ProgressBar {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stdout())
            .with_style(style);
        bar.set_message(label.to_string());
        bar
    }
}

impl OutputSink for TerminalOutput {
    fn status(&self, message: &str) {
        match self.bar().as_ref() {
            Some(bar) => bar.println(message),
            None => println!("{}", message),
        }
    }

    fn transfer(&self, label: &str, progress: &TransferProgress) {
        let mut slot = self.bar();
        let bar = slot.get_or_insert_with(|| Self::new_bar(label));
        bar.set_position(u64::from(progress.percent.min(100)));
        bar.set_prefix(describe_transfer(progress));
    }

    fn transfer_finished(&self) {
        if let Some(bar) = self.bar().take() {
            bar.finish_and_clear();
        }
    }
}

/// `1.2 GiB / 7.8 GiB, 12.0 MiB/s, 9m 10s left`, leaving out what is unknown.
pub fn describe_transfer(progress: &TransferProgress) -> String {
    let mut parts = Vec::new();
    if progress.total_bytes > 0 {
        parts.push(format!(
            "{} / {}",
            HumanBytes(progress.current_bytes),
            HumanBytes(progress.total_bytes)
        ));
    }
    if let Some(rate) = progress.throughput_bytes_per_second {
        parts.push(format!("{}/s", HumanBytes(rate)));
    }
    if let Some(seconds) = progress.estimated_seconds_remaining {
        parts.push(format!("{} left", format_duration(seconds)));
    }
    parts.join(", ")
}

fn format_duration(seconds: u64) -> String {
    let (hours, minutes, seconds) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
