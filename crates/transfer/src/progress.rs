use std::collections::VecDeque;
use std::time::{Duration, Instant};

use uplink_protocol::constants::SPEED_WINDOW;

/// Default cap on retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy)]
struct SpeedSample {
    cumulative_bytes: u64,
    timestamp: Instant,
}

/// Throughput estimator over a sliding window of cumulative byte counts.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 2 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
            window_size: window_size.unwrap_or(SPEED_WINDOW),
        }
    }

    /// Records the cumulative byte count at the current instant.
    pub fn add_sample(&mut self, cumulative_bytes: u64) {
        self.add_sample_at(cumulative_bytes, Instant::now());
    }

    /// Records the cumulative byte count at `timestamp`.
    ///
    /// A count lower than the previous sample means the transfer was
    /// rewound; the window restarts from this sample.
    pub fn add_sample_at(&mut self, cumulative_bytes: u64, timestamp: Instant) {
        if self
            .samples
            .back()
            .is_some_and(|last| cumulative_bytes < last.cumulative_bytes)
        {
            self.samples.clear();
        }
        self.samples.push_back(SpeedSample {
            cumulative_bytes,
            timestamp,
        });

        // Keep one sample older than the window so the span never collapses
        // to nothing during steady transfers.
        if let Some(cutoff) = timestamp.checked_sub(self.window_size) {
            while self.samples.len() > 2 && self.samples[1].timestamp <= cutoff {
                self.samples.pop_front();
            }
        }

        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Bytes per second between the first and last sample in the window.
    ///
    /// Returns 0.0 with fewer than 2 samples or a zero time span.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes = last.cumulative_bytes.saturating_sub(first.cumulative_bytes);
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes` at the current speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        calculate_eta(remaining_bytes, self.bytes_per_second())
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Clears all recorded samples.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

/// Time needed to move `bytes_remaining` at `speed` bytes/second.
///
/// `None` means unknown: the speed is zero, negative or not finite.
/// Nothing left to send is a zero duration.
pub fn calculate_eta(bytes_remaining: u64, speed: f64) -> Option<Duration> {
    if bytes_remaining == 0 {
        return Some(Duration::ZERO);
    }
    if !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(bytes_remaining as f64 / speed).ok()
}
