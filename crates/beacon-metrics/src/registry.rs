//! The metric registry.
//!
//! A [`Registry`] maps each [`MetricKey`] to exactly one [`Metric`]. The map
//! lock is held only while looking up or inserting entries and while copying
//! out references for a collection pass; metric values are read afterwards
//! without it.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{MetricsError, Result};
use crate::metric::{Metric, MetricOptions};
use crate::reading::Reading;
use crate::reporter::Reporter;
use crate::types::{MetricKey, MetricKind, Path, now_millis};

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Which metrics a collection pass returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectFilter {
    /// Only metrics under this path, reported relative to it.
    pub prefix: Path,
    /// Only metrics updated strictly after this millisecond timestamp.
    pub since: Option<i64>,
}

impl CollectFilter {
    /// Every metric, with full paths.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            prefix: Path::root(),
            since: None,
        }
    }

    /// Metrics under `prefix`.
    #[must_use]
    pub const fn under(prefix: Path) -> Self {
        Self {
            prefix,
            since: None,
        }
    }

    /// Restricts to metrics updated after `since`.
    #[must_use]
    pub const fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }
}

/// Thread-safe store of metrics, ordered by key.
///
/// Cloning a registry is cheap and yields a handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    metrics: Arc<RwLock<BTreeMap<MetricKey, Arc<Metric>>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// A reporter that creates metrics under `root`.
    #[must_use]
    pub fn reporter(&self, root: Path) -> Reporter {
        Reporter::new(self.clone(), root)
    }

    /// Returns the metric at `key`, creating it from `options` if absent.
    ///
    /// The first registration wins: a later call with the same kind returns
    /// the existing metric and ignores its description and options.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::IdentityConflict` if a metric of another kind
    /// already holds `key`, or any error from [`Metric::new`].
    pub fn find_or_create(
        &self,
        key: MetricKey,
        description: &str,
        options: MetricOptions,
    ) -> Result<Arc<Metric>> {
        let requested = options.kind();

        if let Some(existing) = self.metrics.read().get(&key) {
            return check_kind(existing, requested);
        }

        let mut metrics = self.metrics.write();
        if let Some(existing) = metrics.get(&key) {
            return check_kind(existing, requested);
        }

        let metric = Arc::new(Metric::new(key.clone(), description, options)?);
        metrics.insert(key, Arc::clone(&metric));
        drop(metrics);

        debug!(metric = %metric.key(), kind = %requested, "registered metric");
        Ok(metric)
    }

    /// Returns the metric at `key`, if registered.
    #[must_use]
    pub fn get(&self, key: &MetricKey) -> Option<Arc<Metric>> {
        self.metrics.read().get(key).cloned()
    }

    /// Number of registered metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    /// Returns true if no metrics are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Collects readings for the metrics selected by `filter`, in key order.
    ///
    /// Paths in the result are relative to `filter.prefix`. Value functions
    /// are evaluated during this call.
    #[must_use]
    pub fn collect(&self, filter: &CollectFilter) -> Vec<Reading> {
        let selected: Vec<Arc<Metric>> = self
            .metrics
            .read()
            .values()
            .filter(|m| m.path().starts_with(&filter.prefix))
            .cloned()
            .collect();

        let now = now_millis();
        let readings: Vec<Reading> = selected
            .iter()
            .map(|metric| metric.collect(now))
            .filter(|reading| filter.since.is_none_or(|since| reading.is_newer_than(since)))
            .map(|mut reading| {
                reading.path = reading.path.stripped(&filter.prefix);
                reading
            })
            .collect();

        debug!(
            prefix = %filter.prefix,
            since = ?filter.since,
            selected = selected.len(),
            readings = readings.len(),
            "collected metrics"
        );
        readings
    }

    /// Collects every metric with full paths.
    #[must_use]
    pub fn collect_all(&self) -> Vec<Reading> {
        self.collect(&CollectFilter::all())
    }

    /// The current reading of the metric at `key`.
    #[must_use]
    pub fn value(&self, key: &MetricKey) -> Option<Reading> {
        self.get(key).map(|metric| metric.collect(now_millis()))
    }
}

fn check_kind(existing: &Arc<Metric>, requested: MetricKind) -> Result<Arc<Metric>> {
    if existing.kind() == requested {
        return Ok(Arc::clone(existing));
    }

    warn!(
        metric = %existing.key(),
        existing = %existing.kind(),
        requested = %requested,
        "metric identity conflict"
    );
    Err(MetricsError::IdentityConflict {
        key: existing.key().to_string(),
        existing: existing.kind(),
        requested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::ReadingValue;
    use crate::types::LabelSet;

    fn key(path: &str) -> MetricKey {
        MetricKey::unlabeled(path.parse().unwrap())
    }

    mod registration_tests {
        use super::*;

        #[test]
        fn find_or_create_returns_same_metric() {
            let registry = Registry::new();
            let a = registry
                .find_or_create(key("a/b"), "first", MetricOptions::Counter)
                .unwrap();
            let b = registry
                .find_or_create(key("a/b"), "second", MetricOptions::Counter)
                .unwrap();

            assert!(Arc::ptr_eq(&a, &b));
            assert_eq!(b.description(), "first");
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn kind_mismatch_is_identity_conflict() {
            let registry = Registry::new();
            registry
                .find_or_create(key("a/b"), "", MetricOptions::Gauge)
                .unwrap();
            let err = registry
                .find_or_create(key("a/b"), "", MetricOptions::Counter)
                .unwrap_err();

            assert!(matches!(
                err,
                MetricsError::IdentityConflict {
                    existing: MetricKind::Gauge,
                    requested: MetricKind::Counter,
                    ..
                }
            ));
        }

        #[test]
        fn labels_distinguish_keys() {
            let registry = Registry::new();
            let labeled = MetricKey::new(
                "a/b".parse().unwrap(),
                LabelSet::from_pairs([("k", "v")]).unwrap(),
            );
            registry
                .find_or_create(key("a/b"), "", MetricOptions::Counter)
                .unwrap();
            registry
                .find_or_create(labeled, "", MetricOptions::Gauge)
                .unwrap();
            assert_eq!(registry.len(), 2);
        }

        #[test]
        fn clones_share_state() {
            let registry = Registry::new();
            let clone = registry.clone();
            registry
                .find_or_create(key("x"), "", MetricOptions::Gauge)
                .unwrap();
            assert!(clone.get(&key("x")).is_some());
        }
    }

    mod collect_tests {
        use super::*;

        #[test]
        fn readings_are_sorted_by_key() {
            let registry = Registry::new();
            for path in ["c", "a/z", "b", "a"] {
                registry
                    .find_or_create(key(path), "", MetricOptions::Gauge)
                    .unwrap();
            }

            let paths: Vec<String> = registry
                .collect_all()
                .into_iter()
                .map(|r| r.path.to_string())
                .collect();
            assert_eq!(paths, ["a", "a/z", "b", "c"]);
        }

        #[test]
        fn prefix_is_stripped() {
            let registry = Registry::new();
            registry
                .find_or_create(key("svc/http/requests"), "", MetricOptions::Counter)
                .unwrap();
            registry
                .find_or_create(key("other"), "", MetricOptions::Counter)
                .unwrap();

            let readings = registry.collect(&CollectFilter::under("svc".parse().unwrap()));
            assert_eq!(readings.len(), 1);
            assert_eq!(readings[0].path.to_string(), "http/requests");
        }

        #[test]
        fn since_excludes_stale_and_unwritten() {
            let registry = Registry::new();
            let old = registry
                .find_or_create(key("old"), "", MetricOptions::Gauge)
                .unwrap();
            let new = registry
                .find_or_create(key("new"), "", MetricOptions::Gauge)
                .unwrap();
            registry
                .find_or_create(key("never"), "", MetricOptions::Gauge)
                .unwrap();

            old.set_gauge_at(1.0, 1_000).unwrap();
            new.set_gauge_at(2.0, 3_000).unwrap();

            let readings = registry.collect(&CollectFilter::all().since(2_000));
            assert_eq!(readings.len(), 1);
            assert_eq!(readings[0].path.to_string(), "new");

            let boundary = registry.collect(&CollectFilter::all().since(3_000));
            assert!(boundary.is_empty());
        }

        #[test]
        fn value_reads_single_metric() {
            let registry = Registry::new();
            let gauge = registry
                .find_or_create(key("g"), "", MetricOptions::Gauge)
                .unwrap();
            gauge.set_gauge_at(7.5, 10).unwrap();

            let reading = registry.value(&key("g")).unwrap();
            assert_eq!(reading.value, ReadingValue::Number(7.5));
            assert_eq!(reading.timestamp, Some(10));
            assert!(registry.value(&key("missing")).is_none());
        }
    }

    #[test]
    fn global_registry_is_shared() {
        let k = key("registry_tests/global");
        Registry::global()
            .find_or_create(k.clone(), "", MetricOptions::Gauge)
            .unwrap();
        assert!(Registry::global().get(&k).is_some());
    }
}
