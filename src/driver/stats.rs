//! Compilation counters.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::driver::CompilationPath;

/// Counts compiled methods per path.
///
/// Each successful compilation increments the total and exactly one of the
/// path counters. Ineligible methods are not counted.
#[derive(Debug, Default)]
pub struct CompilationStats {
    total: AtomicUsize,
    baseline: AtomicUsize,
    optimized: AtomicUsize,
}

impl CompilationStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one method compiled along `path`.
    pub fn record(&self, path: CompilationPath) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match path {
            CompilationPath::Optimized => &self.optimized,
            CompilationPath::Baseline => &self.baseline,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            baseline: self.baseline.load(Ordering::Relaxed),
            optimized: self.optimized.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Methods compiled.
    pub total: usize,
    /// Methods compiled by the baseline generator.
    pub baseline: usize,
    /// Methods compiled by the optimizing pipeline.
    pub optimized: usize,
}

impl StatsSnapshot {
    /// Share of baseline compilations in percent, `None` before the first
    /// compilation.
    #[must_use]
    pub fn baseline_percent(&self) -> Option<f64> {
        percent(self.baseline, self.total)
    }

    /// Share of optimized compilations in percent, `None` before the first
    /// compilation.
    #[must_use]
    pub fn optimized_percent(&self) -> Option<f64> {
        percent(self.optimized, self.total)
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: usize, total: usize) -> Option<f64> {
    (total != 0).then(|| part as f64 * 100.0 / total as f64)
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.baseline_percent(), self.optimized_percent()) {
            (Some(baseline), Some(optimized)) => write!(
                f,
                "Compiled {} methods: {baseline:.0}% ({}) unoptimized, {optimized:.0}% ({}) optimized.",
                self.total, self.baseline, self.optimized
            ),
            _ => f.write_str("Did not compile any method."),
        }
    }
}
