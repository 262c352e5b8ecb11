use crate::models::Phase;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Receives progress events from the phases.
pub trait ProgressReporter: Send + Sync {
    /// `total` is `None` when the amount of work is not known upfront.
    fn phase_started(&self, phase: Phase, total: Option<u64>);
    fn advance(&self, phase: Phase, delta: u64);
    fn message(&self, phase: Phase, message: &str);
    fn phase_finished(&self, phase: Phase, summary: &str);
}

/// Terminal progress bars, one per phase.
pub struct IndicatifReporter {
    bars: Mutex<HashMap<Phase, ProgressBar>>,
}

impl IndicatifReporter {
    pub fn new() -> Self {
        Self {
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn with_bar(&self, phase: Phase, f: impl FnOnce(&ProgressBar)) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(&phase) {
                f(bar);
            }
        }
    }
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for IndicatifReporter {
    fn phase_started(&self, phase: Phase, total: Option<u64>) {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::with_template(
                    "{prefix:>11} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                let style = ProgressStyle::with_template(
                    "{prefix:>11} [{elapsed_precise}] {spinner} {pos} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
                bar.set_style(style);
                bar
            }
        };
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.set_prefix(phase.as_str());
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(phase, bar);
        }
    }

    fn advance(&self, phase: Phase, delta: u64) {
        self.with_bar(phase, |bar| bar.inc(delta));
    }

    fn message(&self, phase: Phase, message: &str) {
        let message = message.to_string();
        self.with_bar(phase, move |bar| bar.set_message(message));
    }

    fn phase_finished(&self, phase: Phase, summary: &str) {
        let summary = summary.to_string();
        self.with_bar(phase, move |bar| bar.finish_with_message(summary));
    }
}

/// Logs progress through `tracing`, at most once per `every` processed items.
pub struct LogReporter {
    every: u64,
    counts: Mutex<HashMap<Phase, (u64, Option<u64>)>>,
}

impl LogReporter {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl ProgressReporter for LogReporter {
    fn phase_started(&self, phase: Phase, total: Option<u64>) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.insert(phase, (0, total));
        }
        match total {
            Some(total) => info!("Starting {} ({} items)", phase, total),
            None => info!("Starting {}", phase),
        }
    }

    fn advance(&self, phase: Phase, delta: u64) {
        let Ok(mut counts) = self.counts.lock() else {
            return;
        };
        let entry = counts.entry(phase).or_insert((0, None));
        let before = entry.0 / self.every;
        entry.0 += delta;
        if entry.0 / self.every > before {
            match entry.1 {
                Some(total) => info!("{}: {}/{}", phase, entry.0, total),
                None => info!("{}: {}", phase, entry.0),
            }
        }
    }

    fn message(&self, phase: Phase, message: &str) {
        info!("{}: {}", phase, message);
    }

    fn phase_finished(&self, phase: Phase, summary: &str) {
        info!("Finished {}: {}", phase, summary);
    }
}

pub struct NoOpReporter;

impl ProgressReporter for NoOpReporter {
    fn phase_started(&self, _phase: Phase, _total: Option<u64>) {}
    fn advance(&self, _phase: Phase, _delta: u64) {}
    fn message(&self, _phase: Phase, _message: &str) {}
    fn phase_finished(&self, _phase: Phase, _summary: &str) {}
}
