//! Campaign read statistics
//!
//! Latency samples, error count and completed reads recorded by workers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Shared sink for per-read measurements.
#[derive(Debug, Default)]
pub struct CampaignStats {
    latencies_ms: Mutex<Vec<u64>>,
    errors: AtomicU64,
    completed: AtomicU64,
}

impl CampaignStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the wall-clock duration of one finished read
    pub fn record_latency(&self, millis: u64) {
        self.latencies_ms.lock().push(millis);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Number of reads that finished, successfully or not
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary::from_samples(&self.latencies_ms.lock())
    }
}

/// Min/mean/max over a latency sample sequence.
///
/// All fields are `None` when no sample was recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub mean_ms: Option<u64>,
}

impl LatencySummary {
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut total: u128 = 0;
        let mut min = u64::MAX;
        let mut max = 0;
        for &spent in samples {
            total += u128::from(spent);
            min = min.min(spent);
            max = max.max(spent);
        }

        let count = samples.len() as u64;
        Self {
            count,
            min_ms: Some(min),
            max_ms: Some(max),
            mean_ms: Some((total / u128::from(count)) as u64),
        }
    }
}

impl fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mean_ms, self.min_ms, self.max_ms) {
            (Some(mean), Some(min), Some(max)) => {
                write!(f, "mean = {}ms, min = {}ms, max = {}ms", mean, min, max)
            }
            _ => write!(f, "mean = n/a, min = n/a, max = n/a (no samples)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_of_known_samples() {
        let summary = LatencySummary::from_samples(&[5, 10, 15]);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min_ms, Some(5));
        assert_eq!(summary.max_ms, Some(15));
        assert_eq!(summary.mean_ms, Some(10));
    }

    #[test]
    fn test_min_tracks_descending_sequence() {
        let summary = LatencySummary::from_samples(&[30, 20, 10]);
        assert_eq!(summary.min_ms, Some(10));
        assert_eq!(summary.max_ms, Some(30));
    }

    #[test]
    fn test_empty_samples_are_undefined() {
        let summary = LatencySummary::from_samples(&[]);
        assert_eq!(summary.count, 0);
        assert!(summary.mean_ms.is_none());
        assert!(summary.to_string().contains("no samples"));
    }

    #[test]
    fn test_mean_truncates() {
        let summary = LatencySummary::from_samples(&[1, 2]);
        assert_eq!(summary.mean_ms, Some(1));
    }

    #[test]
    fn test_campaign_stats_counts() {
        let stats = CampaignStats::new();
        stats.record_latency(12);
        stats.record_latency(8);
        stats.record_error();

        assert_eq!(stats.completed(), 2);
        assert_eq!(stats.error_count(), 1);
        assert_eq!(stats.summary().min_ms, Some(8));
    }
}
