//! Terminal output utilities

use console::style;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use ritual_core::{Event, EventSink};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).dim(), value);
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

/// Event sink drawing one spinner per running operation.
///
/// Transfer updates only report cumulative bytes, so spinners are used
/// rather than bars.
#[derive(Default)]
pub struct ProgressSink {
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, operation: String, message: String) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut bars) = self.bars.lock() {
            if let Some(previous) = bars.insert(operation, bar) {
                previous.finish_and_clear();
            }
        }
    }

    fn take(&self, operation: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(operation)
    }
}

impl EventSink for ProgressSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Start { operation, message } => self.start(operation, message),
            Event::Update {
                operation,
                bytes,
                percent,
            } => {
                let progress = match percent {
                    Some(percent) => format!("{} ({}%)", HumanBytes(bytes), percent),
                    None => HumanBytes(bytes).to_string(),
                };
                let message = format!("{}: {}", operation, progress);

                // transfers report updates without a prior start
                let existing = self
                    .bars
                    .lock()
                    .ok()
                    .and_then(|bars| bars.get(&operation).cloned());
                match existing {
                    Some(bar) => bar.set_message(message),
                    None => self.start(operation, message),
                }
            }
            Event::Finish { operation, message } => {
                if let Some(bar) = self.take(&operation) {
                    bar.finish_and_clear();
                }
                success(&format!("{}: {}", operation, message));
            }
            Event::Error { operation, message } => {
                if let Some(bar) = self.take(&operation) {
                    bar.abandon();
                }
                error(&format!("{}: {}", operation, message));
            }
            Event::Prompt { message, .. } => warning(&message),
        }
    }
}
