//! Transfer progress snapshots.
//!
//! Both strategies produce [`TransferProgress`] values: the accelerated one
//! by parsing tool output, the direct one by measuring its own byte stream
//! with a [`ThroughputMeter`].

use std::time::{Duration, Instant};

/// A point-in-time view of a running transfer. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    /// Completion, 0 to 100.
    pub percent: u8,
    /// Bytes received so far.
    pub current_bytes: u64,
    /// Expected total bytes, 0 when unknown.
    pub total_bytes: u64,
    /// Current speed in bytes per second.
    pub throughput_bytes_per_second: Option<u64>,
    /// Estimated seconds until completion.
    pub estimated_seconds_remaining: Option<u64>,
}

impl TransferProgress {
    /// Build a snapshot from byte counts, deriving the percentage.
    pub fn from_bytes(current_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0
        } else {
            ((current_bytes.min(total_bytes) as u128 * 100) / total_bytes as u128) as u8
        };

        Self {
            percent,
            current_bytes,
            total_bytes,
            throughput_bytes_per_second: None,
            estimated_seconds_remaining: None,
        }
    }

    /// Attach a throughput and derive the remaining time from it.
    pub fn with_throughput(mut self, bytes_per_second: u64) -> Self {
        self.throughput_bytes_per_second = Some(bytes_per_second);
        self.estimated_seconds_remaining = (bytes_per_second > 0 && self.total_bytes > 0)
            .then(|| {
                self.total_bytes
                    .saturating_sub(self.current_bytes)
                    .div_ceil(bytes_per_second)
            });
        self
    }

    /// Fraction complete in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        f64::from(self.percent.min(100)) / 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.total_bytes > 0 && self.current_bytes >= self.total_bytes
    }
}

/// Measures throughput of a byte stream over a sliding window.
///
/// Progress is only emitted once per `interval` so a fast connection
/// doesn't flood the foreground with updates.
#[derive(Debug)]
pub struct ThroughputMeter {
    interval: Duration,
    window_start: Instant,
    window_bytes: u64,
    last_rate: Option<u64>,
}

impl ThroughputMeter {
    /// Default reporting interval.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            window_bytes: 0,
            last_rate: None,
        }
    }

    /// Record `bytes` received at `now`.
    ///
    /// Returns the rate in bytes per second when a window closes.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<u64> {
        self.window_bytes += bytes;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let rate = (self.window_bytes as f64 / elapsed.as_secs_f64()).round() as u64;
        self.window_start = now;
        self.window_bytes = 0;
        self.last_rate = Some(rate);
        Some(rate)
    }

    /// The most recently measured rate.
    pub fn last_rate(&self) -> Option<u64> {
        self.last_rate
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
