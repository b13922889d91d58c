//! Rolling in-memory sample history.
//!
//! [`DataStore`] keeps every sample from the last seven days in timestamp
//! order. The sampling side appends; any number of readers take window
//! snapshots. One lock covers both, so a reader never sees a sample that
//! was appended but not yet trimmed against.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use time::{Duration, OffsetDateTime};
use tracing::debug;

use pmsense_types::Sample;

use crate::stats::{TimeWindow, WindowStats};

/// How long samples are retained.
pub const DEFAULT_RETENTION: Duration = Duration::days(7);

/// Thread-safe, time-ordered sample buffer with bounded retention.
#[derive(Debug)]
pub struct DataStore {
    samples: Mutex<VecDeque<Sample>>,
    retention: Duration,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    /// Create an empty store with the default seven-day retention.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create an empty store with a custom retention.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Retention applied on every insert.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a sample and trim anything older than the retention.
    pub fn add(&self, sample: Sample) {
        self.add_at(sample, OffsetDateTime::now_utc());
    }

    /// Append a sample, trimming relative to `now`.
    ///
    /// Samples normally arrive in order; a sample older than the newest
    /// one (after a clock step, say) is inserted at its sorted position.
    pub fn add_at(&self, sample: Sample, now: OffsetDateTime) {
        let mut samples = self.lock();
        match samples.back() {
            Some(last) if sample.timestamp < last.timestamp => {
                let at = samples.partition_point(|s| s.timestamp <= sample.timestamp);
                samples.insert(at, sample);
            }
            _ => samples.push_back(sample),
        }

        let cutoff = now - self.retention;
        let mut trimmed = 0usize;
        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
            trimmed += 1;
        }
        if trimmed > 0 {
            debug!("Trimmed {} samples older than {}", trimmed, cutoff);
        }
    }

    /// Samples within the trailing `window`, or all samples for `None`.
    ///
    /// Returns a copy; the lock is released before the caller iterates.
    pub fn window(&self, window: Option<Duration>) -> Vec<Sample> {
        self.window_at(window, OffsetDateTime::now_utc())
    }

    /// Samples with `timestamp >= now - window`, or all samples for `None`.
    pub fn window_at(&self, window: Option<Duration>, now: OffsetDateTime) -> Vec<Sample> {
        let samples = self.lock();
        let start = match window {
            Some(window) => {
                let cutoff = now - window;
                samples.partition_point(|s| s.timestamp < cutoff)
            }
            None => 0,
        };
        samples.range(start..).copied().collect()
    }

    /// Samples for a preset window.
    pub fn samples(&self, window: TimeWindow) -> Vec<Sample> {
        self.window(window.duration())
    }

    /// Statistics for a preset window.
    pub fn stats(&self, window: TimeWindow) -> WindowStats {
        WindowStats::compute(window, &self.samples(window))
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<Sample> {
        self.lock().back().copied()
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample(ts: OffsetDateTime, pm25: f64) -> Sample {
        Sample::new(ts, [1.0, pm25, 3.0, 4.0])
    }

    #[test]
    fn test_add_and_window_all() {
        let store = DataStore::new();
        let now = datetime!(2025-03-01 12:00 UTC);
        store.add_at(sample(now - Duration::minutes(2), 1.0), now);
        store.add_at(sample(now - Duration::minutes(1), 2.0), now);

        let all = store.window_at(None, now);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pm2_5, 1.0);
        assert_eq!(store.latest().map(|s| s.pm2_5), Some(2.0));
    }

    #[test]
    fn test_retention_trims_oldest() {
        let store = DataStore::new();
        let now = datetime!(2025-03-08 12:00 UTC);
        store.add_at(sample(now - Duration::days(8), 1.0), now - Duration::days(8));
        store.add_at(sample(now - Duration::days(6), 2.0), now - Duration::days(6));
        assert_eq!(store.len(), 2);

        store.add_at(sample(now, 3.0), now);
        let all = store.window_at(None, now);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pm2_5, 2.0);
    }

    #[test]
    fn test_sample_at_cutoff_is_kept() {
        let store = DataStore::new();
        let now = datetime!(2025-03-08 12:00 UTC);
        store.add_at(sample(now - DEFAULT_RETENTION, 1.0), now);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let store = DataStore::new();
        let now = datetime!(2025-03-01 12:00 UTC);
        store.add_at(sample(now - Duration::hours(1), 1.0), now);
        store.add_at(sample(now - Duration::hours(1) - Duration::seconds(1), 0.5), now);

        let hour = store.window_at(Some(Duration::hours(1)), now);
        assert_eq!(hour.len(), 1);
        assert_eq!(hour[0].pm2_5, 1.0);
    }

    #[test]
    fn test_out_of_order_sample_is_sorted() {
        let store = DataStore::new();
        let now = datetime!(2025-03-01 12:00 UTC);
        store.add_at(sample(now - Duration::minutes(1), 2.0), now);
        store.add_at(sample(now - Duration::minutes(3), 1.0), now);

        let all = store.window_at(None, now);
        assert!(all[0].timestamp < all[1].timestamp);
        assert_eq!(store.latest().map(|s| s.pm2_5), Some(2.0));
    }

    #[test]
    fn test_window_is_a_snapshot() {
        let store = DataStore::new();
        let now = datetime!(2025-03-01 12:00 UTC);
        store.add_at(sample(now, 1.0), now);
        let snapshot = store.window_at(None, now);
        store.add_at(sample(now + Duration::seconds(5), 2.0), now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        use std::sync::Arc;

        let store = Arc::new(DataStore::new());
        let base = OffsetDateTime::now_utc();
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.add(sample(base + Duration::milliseconds(i), i as f64));
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let all = store.window(None);
                    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(), 500);
    }
}
