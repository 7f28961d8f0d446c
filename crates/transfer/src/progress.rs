use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Maximum number of retained rate samples.
const MAX_SAMPLES: usize = 10;

/// Minimum time between two recorded samples.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum bytes that must arrive between two recorded samples.
const MIN_SAMPLE_BYTES: u64 = 1024;

// ---------------------------------------------------------------------------
// SpeedEstimator
// ---------------------------------------------------------------------------

/// Smoothed transfer-rate estimator.
///
/// Keeps a ring of the last ten instantaneous rates. A sample is taken only
/// once at least one second and at least 1 KiB have passed since the
/// previous one. The smoothed rate weights samples linearly from 1 (oldest)
/// to 3 (newest).
#[derive(Debug, Clone, Default)]
pub struct SpeedEstimator {
    samples: VecDeque<f64>,
    baseline: Option<(Instant, u64)>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the cumulative byte count observed now.
    pub fn observe(&mut self, total_bytes: u64) {
        self.observe_at(total_bytes, Instant::now());
    }

    /// Records the cumulative byte count observed at `now`.
    ///
    /// A count lower than the previous baseline (a restarted transfer)
    /// moves the baseline without producing a sample.
    pub fn observe_at(&mut self, total_bytes: u64, now: Instant) {
        let Some((last_at, last_bytes)) = self.baseline else {
            self.baseline = Some((now, total_bytes));
            return;
        };

        if total_bytes < last_bytes {
            self.baseline = Some((now, total_bytes));
            return;
        }

        let elapsed = now.saturating_duration_since(last_at);
        let delta = total_bytes - last_bytes;
        if elapsed < MIN_SAMPLE_INTERVAL || delta < MIN_SAMPLE_BYTES {
            return;
        }

        let rate = delta as f64 / elapsed.as_secs_f64();
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(rate);
        self.baseline = Some((now, total_bytes));
    }

    /// Smoothed rate in bytes/second. Zero until the first sample.
    pub fn bytes_per_second(&self) -> f64 {
        let n = self.samples.len();
        if n == 0 {
            return 0.0;
        }
        if n == 1 {
            return self.samples[0];
        }

        let mut weighted = 0.0;
        let mut weights = 0.0;
        for (i, rate) in self.samples.iter().enumerate() {
            let w = 1.0 + 2.0 * i as f64 / (n - 1) as f64;
            weighted += rate * w;
            weights += w;
        }
        weighted / weights
    }

    /// Estimated time to transfer `remaining_bytes`.
    ///
    /// `None` while no positive rate is known.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if !speed.is_finite() || speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Number of retained samples.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Clears all samples and the baseline.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.baseline = None;
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with binary units, e.g. `1.5 MB`.
///
/// At most two decimals are shown and trailing zeros are dropped.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".into();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}

/// Percentage of `done` over `total`, clamped to `0.0..=100.0`.
///
/// An empty total counts as 0%.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}
