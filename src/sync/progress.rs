//! Throttled session progress.
//!
//! Drawn as an indicatif bar when stderr is a terminal, logged otherwise.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Minimum time between two reports
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

const MIB: f64 = 1024.0 * 1024.0;

/// One progress report
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub processed: u64,
    pub total: u64,
    pub same_blocks: u64,
    pub diff_blocks: u64,
    pub elapsed: Duration,
}

impl Snapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.processed as f64 / self.total as f64
        }
    }

    /// Throughput in MiB/s
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / MIB / secs
        } else {
            0.0
        }
    }

    /// Estimated time remaining, extrapolated from the average so far
    pub fn eta(&self) -> Option<Duration> {
        if self.processed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.processed) as f64;
        Some(self.elapsed.mul_f64(remaining / self.processed as f64))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "same: {}, diff: {}, {:6.2} %, {:5.1} MiB/s",
            self.same_blocks,
            self.diff_blocks,
            self.percent(),
            self.rate()
        )?;
        match self.eta() {
            Some(eta) => write!(f, ", ETR: {} min", eta.as_secs() / 60),
            None => Ok(()),
        }
    }
}

pub struct ProgressMeter {
    total: u64,
    started: Instant,
    last_report: Instant,
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl ProgressMeter {
    pub fn new(total: u64, quiet: bool) -> Self {
        let bar = if quiet {
            None
        } else {
            let bar = ProgressBar::new(total);
            if bar.is_hidden() {
                None
            } else {
                let style = ProgressStyle::with_template(
                    "[{elapsed_precise}] {wide_bar} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                Some(bar)
            }
        };

        let now = Instant::now();
        Self {
            total,
            started: now,
            last_report: now,
            bar,
            quiet,
        }
    }

    /// Record progress; reports at most once per [`REPORT_INTERVAL`] and
    /// always once everything is processed.
    pub fn update(&mut self, processed: u64, same_blocks: u64, diff_blocks: u64) {
        if let Some(snapshot) = self.tick(Instant::now(), processed, same_blocks, diff_blocks) {
            self.render(&snapshot);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish();
        }
    }

    fn tick(
        &mut self,
        now: Instant,
        processed: u64,
        same_blocks: u64,
        diff_blocks: u64,
    ) -> Option<Snapshot> {
        let done = processed >= self.total;
        if !done && now.duration_since(self.last_report) < REPORT_INTERVAL {
            return None;
        }
        self.last_report = now;

        Some(Snapshot {
            processed,
            total: self.total,
            same_blocks,
            diff_blocks,
            elapsed: now.duration_since(self.started),
        })
    }

    fn render(&self, snapshot: &Snapshot) {
        match &self.bar {
            Some(bar) => {
                bar.set_position(snapshot.processed);
                bar.set_message(format!(
                    "same: {}, diff: {}",
                    snapshot.same_blocks, snapshot.diff_blocks
                ));
            }
            None if self.quiet => debug!("{}", snapshot),
            None => info!("{}", snapshot),
        }
    }
}
