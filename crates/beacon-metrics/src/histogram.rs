//! Fixed-capacity windowed sampler backing histogram metrics.
//!
//! Each [`Sampler`] owns a circular buffer of `(value, timestamp)` slots. The
//! write index is advanced under a dedicated lock; the slot itself is written
//! after the lock is released, since each index belongs to exactly one writer
//! until the buffer wraps. Reads copy out every slot whose timestamp falls in
//! the requested window.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{MetricsError, Result};
use crate::types::now_millis;

/// Default number of slots per histogram.
pub const DEFAULT_CAPACITY: usize = 5000;

/// Default read window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default bucket upper bounds; samples above the last bound overflow.
pub const DEFAULT_BUCKETS: &[f64] = &[
    10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Quantiles reported in quantile mode.
pub const QUANTILES: &[(f64, &str)] = &[
    (0.5, "p50"),
    (0.9, "p90"),
    (0.95, "p95"),
    (0.99, "p99"),
    (0.999, "p999"),
];

const UNWRITTEN: i64 = i64::MIN;

/// How a histogram summarizes its window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Order-statistic estimates at [`QUANTILES`].
    Quantiles,
    /// Fraction of samples per bucket, exclusive upper bounds.
    Buckets(Vec<f64>),
}

/// Configuration for a histogram's sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramConfig {
    /// Number of slots in the circular buffer.
    pub capacity: usize,
    /// Default read window.
    pub window: Duration,
    /// Summary mode.
    pub mode: ReadMode,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: DEFAULT_WINDOW,
            mode: ReadMode::Quantiles,
        }
    }
}

impl HistogramConfig {
    /// Quantile-mode configuration with default capacity and window.
    #[must_use]
    pub fn quantiles() -> Self {
        Self::default()
    }

    /// Bucket-mode configuration with the given ascending upper bounds.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` if the bounds are empty,
    /// non-finite, or not strictly ascending.
    pub fn buckets(bounds: Vec<f64>) -> Result<Self> {
        let config = Self {
            mode: ReadMode::Buckets(bounds),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the buffer capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the default read window.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Validates capacity and bucket bounds.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MetricsError::invalid_argument(
                "histogram capacity must be greater than 0",
            ));
        }

        if let ReadMode::Buckets(bounds) = &self.mode {
            if bounds.is_empty() {
                return Err(MetricsError::invalid_argument(
                    "histogram buckets cannot be empty",
                ));
            }
            if bounds.iter().any(|b| !b.is_finite()) {
                return Err(MetricsError::invalid_argument(
                    "histogram buckets must be finite",
                ));
            }
            if !bounds.windows(2).all(|w| w[0] < w[1]) {
                return Err(MetricsError::invalid_argument(
                    "histogram buckets must be strictly ascending",
                ));
            }
        }

        Ok(())
    }
}

/// Share of the window that fell into one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketShare {
    /// Exclusive upper bound; `None` for the overflow bucket.
    pub upper: Option<f64>,
    /// Raw number of samples.
    pub count: usize,
    /// `count / total`, rounded to two decimals.
    pub fraction: f64,
}

/// Mode-specific part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Summary {
    /// `(name, value)` pairs such as `("p50", 12.0)`; empty when no samples.
    Quantiles(Vec<(&'static str, f64)>),
    /// One entry per bound plus overflow.
    Buckets(Vec<BucketShare>),
}

/// Summary of the samples within a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    /// Number of samples in the window.
    pub count: usize,
    /// Smallest sample, absent when empty.
    pub min: Option<f64>,
    /// Largest sample, absent when empty.
    pub max: Option<f64>,
    /// Quantiles or bucket shares.
    pub summary: Summary,
}

impl HistogramSnapshot {
    /// Summarizes `values` according to `mode`.
    #[must_use]
    pub fn from_samples(mut values: Vec<f64>, mode: &ReadMode) -> Self {
        values.sort_by(f64::total_cmp);
        let count = values.len();
        let min = values.first().copied();
        let max = values.last().copied();

        let summary = match mode {
            ReadMode::Quantiles => Summary::Quantiles(quantiles(&values)),
            ReadMode::Buckets(bounds) => Summary::Buckets(bucket_shares(&values, bounds)),
        };

        Self {
            count,
            min,
            max,
            summary,
        }
    }

    /// Returns true if the window held no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn quantiles(sorted: &[f64]) -> Vec<(&'static str, f64)> {
    if sorted.is_empty() {
        return Vec::new();
    }
    let last = (sorted.len() - 1) as f64;
    QUANTILES
        .iter()
        .map(|&(q, name)| (name, sorted[(last * q).round() as usize]))
        .collect()
}

fn bucket_shares(values: &[f64], bounds: &[f64]) -> Vec<BucketShare> {
    let mut counts = vec![0usize; bounds.len() + 1];
    for &v in values {
        let slot = bounds.iter().position(|&b| v < b).unwrap_or(bounds.len());
        counts[slot] += 1;
    }

    let total = values.len();
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| BucketShare {
            upper: bounds.get(i).copied(),
            count,
            fraction: if total == 0 {
                0.0
            } else {
                (count as f64 / total as f64 * 100.0).round() / 100.0
            },
        })
        .collect()
}

/// Circular buffer of timestamped samples.
pub struct Sampler {
    values: Box<[AtomicU64]>,
    timestamps: Box<[AtomicI64]>,
    index: Mutex<usize>,
    last_record_at: AtomicI64,
    config: HistogramConfig,
}

impl Sampler {
    /// Creates a sampler from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` if the configuration is invalid.
    pub fn new(config: HistogramConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity;
        Ok(Self {
            values: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            timestamps: (0..capacity).map(|_| AtomicI64::new(UNWRITTEN)).collect(),
            index: Mutex::new(capacity - 1),
            last_record_at: AtomicI64::new(UNWRITTEN),
            config,
        })
    }

    /// Returns the sampler's configuration.
    #[must_use]
    pub const fn config(&self) -> &HistogramConfig {
        &self.config
    }

    /// Records a sample stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` for non-finite values.
    pub fn record(&self, value: f64) -> Result<()> {
        self.record_at(value, now_millis())
    }

    /// Records a sample with an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` for non-finite values.
    pub fn record_at(&self, value: f64, at_millis: i64) -> Result<()> {
        if !value.is_finite() {
            return Err(MetricsError::invalid_argument(format!(
                "histogram samples must be finite, got {value}"
            )));
        }

        let slot = {
            let mut index = self.index.lock();
            *index = (*index + 1) % self.config.capacity;
            *index
        };

        self.values[slot].store(value.to_bits(), Ordering::Relaxed);
        self.timestamps[slot].store(at_millis, Ordering::Release);
        self.last_record_at.fetch_max(at_millis, Ordering::Relaxed);
        Ok(())
    }

    /// Timestamp of the newest sample, if any.
    #[must_use]
    pub fn last_record_at(&self) -> Option<i64> {
        match self.last_record_at.load(Ordering::Relaxed) {
            UNWRITTEN => None,
            at => Some(at),
        }
    }

    /// Copies out samples stamped within `[now - window, now]`.
    #[must_use]
    pub fn samples(&self, window: Duration, now: i64) -> Vec<f64> {
        let cutoff = now.saturating_sub(window.as_millis() as i64);
        self.timestamps
            .iter()
            .zip(self.values.iter())
            .filter_map(|(ts, value)| {
                let ts = ts.load(Ordering::Acquire);
                (ts != UNWRITTEN && ts >= cutoff && ts <= now)
                    .then(|| f64::from_bits(value.load(Ordering::Relaxed)))
            })
            .collect()
    }

    /// Summarizes the configured window ending now.
    #[must_use]
    pub fn read(&self) -> HistogramSnapshot {
        self.read_window(self.config.window)
    }

    /// Summarizes an explicit window ending now.
    #[must_use]
    pub fn read_window(&self, window: Duration) -> HistogramSnapshot {
        HistogramSnapshot::from_samples(self.samples(window, now_millis()), &self.config.mode)
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("capacity", &self.config.capacity)
            .field("window", &self.config.window)
            .field("mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sampler(capacity: usize) -> Sampler {
        Sampler::new(HistogramConfig::quantiles().with_capacity(capacity)).unwrap()
    }

    mod config_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn default_config() {
            let config = HistogramConfig::default();
            assert_eq!(config.capacity, 5000);
            assert_eq!(config.window, Duration::from_secs(60));
            assert_eq!(config.mode, ReadMode::Quantiles);
        }

        #[test]
        fn zero_capacity_fails() {
            assert!(Sampler::new(HistogramConfig::default().with_capacity(0)).is_err());
        }

        #[test_case(vec![] ; "empty")]
        #[test_case(vec![10.0, 5.0] ; "descending")]
        #[test_case(vec![10.0, 10.0] ; "duplicate")]
        #[test_case(vec![10.0, f64::INFINITY] ; "infinite")]
        fn invalid_buckets_fail(bounds: Vec<f64>) {
            assert!(HistogramConfig::buckets(bounds).is_err());
        }

        #[test]
        fn default_buckets_are_valid() {
            assert!(HistogramConfig::buckets(DEFAULT_BUCKETS.to_vec()).is_ok());
        }
    }

    mod quantile_tests {
        use super::*;

        #[test]
        fn empty_window_is_well_defined() {
            let s = sampler(10);
            let snap = s.read();
            assert_eq!(snap.count, 0);
            assert_eq!(snap.min, None);
            assert_eq!(snap.max, None);
            assert_eq!(snap.summary, Summary::Quantiles(vec![]));
        }

        #[test]
        fn order_statistics() {
            let s = sampler(200);
            for v in 1..=100 {
                s.record(f64::from(v)).unwrap();
            }

            let snap = s.read();
            assert_eq!(snap.count, 100);
            assert_eq!(snap.min, Some(1.0));
            assert_eq!(snap.max, Some(100.0));

            // index = round(99 * q)
            let Summary::Quantiles(qs) = snap.summary else {
                panic!("expected quantiles");
            };
            assert_eq!(
                qs,
                vec![
                    ("p50", 51.0),
                    ("p90", 90.0),
                    ("p95", 95.0),
                    ("p99", 99.0),
                    ("p999", 100.0)
                ]
            );
        }

        #[test]
        fn single_sample() {
            let s = sampler(4);
            s.record(7.5).unwrap();
            let snap = s.read();
            assert_eq!(snap.count, 1);
            let Summary::Quantiles(qs) = snap.summary else {
                panic!("expected quantiles");
            };
            assert!(qs.iter().all(|&(_, v)| (v - 7.5).abs() < f64::EPSILON));
        }

        #[test]
        fn non_finite_sample_fails() {
            let s = sampler(4);
            assert!(s.record(f64::NAN).is_err());
            assert!(s.record(f64::INFINITY).is_err());
            assert_eq!(s.read().count, 0);
        }
    }

    mod bucket_tests {
        use super::*;

        #[test]
        fn first_match_exclusive_upper_bound() {
            let config = HistogramConfig::buckets(vec![10.0, 100.0]).unwrap();
            let s = Sampler::new(config).unwrap();
            for v in [1.0, 9.99, 10.0, 50.0, 100.0, 1000.0] {
                s.record(v).unwrap();
            }

            let snap = s.read();
            let Summary::Buckets(buckets) = snap.summary else {
                panic!("expected buckets");
            };
            let counts: Vec<usize> = buckets.iter().map(|b| b.count).collect();
            assert_eq!(counts, [2, 2, 2]);
            assert_eq!(buckets[2].upper, None);
            assert!((buckets[0].fraction - 0.33).abs() < f64::EPSILON);
            assert_eq!(snap.min, Some(1.0));
            assert_eq!(snap.max, Some(1000.0));
        }

        #[test]
        fn empty_buckets_report_zero() {
            let s = Sampler::new(HistogramConfig::buckets(vec![1.0]).unwrap()).unwrap();
            let snap = s.read();
            let Summary::Buckets(buckets) = snap.summary else {
                panic!("expected buckets");
            };
            assert_eq!(buckets.len(), 2);
            assert!(buckets.iter().all(|b| b.count == 0 && b.fraction == 0.0));
        }
    }

    mod window_tests {
        use super::*;

        #[test]
        fn old_samples_age_out() {
            let s = sampler(100);
            let now = now_millis();
            s.record_at(1.0, now - 120_000).unwrap();
            s.record_at(2.0, now - 1_000).unwrap();

            let values = s.samples(Duration::from_secs(60), now);
            assert_eq!(values, vec![2.0]);
        }

        #[test]
        fn future_samples_are_excluded() {
            let s = sampler(10);
            let now = now_millis();
            s.record_at(1.0, now + 60_000).unwrap();
            assert!(s.samples(Duration::from_secs(60), now).is_empty());
        }

        #[test]
        fn wrap_overwrites_oldest_slot() {
            let s = sampler(3);
            for v in 1..=5 {
                s.record(f64::from(v)).unwrap();
            }
            let mut values = s.samples(Duration::from_secs(60), now_millis());
            values.sort_by(f64::total_cmp);
            assert_eq!(values, vec![3.0, 4.0, 5.0]);
        }

        #[test]
        fn last_record_at_tracks_newest() {
            let s = sampler(10);
            assert_eq!(s.last_record_at(), None);
            s.record_at(1.0, 2_000).unwrap();
            s.record_at(1.0, 1_000).unwrap();
            assert_eq!(s.last_record_at(), Some(2_000));
        }
    }

    mod concurrent_tests {
        use super::*;

        #[test]
        fn concurrent_record_fills_distinct_slots() {
            let s = Arc::new(sampler(1000));
            let mut handles = vec![];

            for t in 0..10 {
                let s = Arc::clone(&s);
                handles.push(thread::spawn(move || {
                    for i in 0..100 {
                        s.record(f64::from(t * 100 + i)).unwrap();
                    }
                }));
            }

            for handle in handles {
                handle.join().unwrap();
            }

            let snap = s.read();
            assert_eq!(snap.count, 1000);
            assert_eq!(snap.min, Some(0.0));
            assert_eq!(snap.max, Some(999.0));
        }
    }
}
