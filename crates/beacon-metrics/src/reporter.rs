//! Scoped metric creation.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::handle::{Counter, Gauge, Histogram, Info, State};
use crate::histogram::HistogramConfig;
use crate::metric::{Metric, MetricOptions};
use crate::registry::Registry;
use crate::types::{MetricKey, MetricKind, Path};

/// Creates metrics in a registry under a fixed path prefix.
///
/// Reporters are immutable; [`Reporter::scoped`] returns a new one with a
/// longer prefix.
#[derive(Debug, Clone)]
pub struct Reporter {
    registry: Registry,
    prefix: Path,
}

impl Reporter {
    /// Creates a reporter for `registry` rooted at `prefix`.
    #[must_use]
    pub const fn new(registry: Registry, prefix: Path) -> Self {
        Self { registry, prefix }
    }

    /// A reporter whose prefix is this one's extended by `parts`.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidPath` if any part is empty or contains `/`.
    pub fn scoped<I, S>(&self, parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            registry: self.registry.clone(),
            prefix: self.prefix.scoped(parts)?,
        })
    }

    /// The path every created metric starts with.
    #[must_use]
    pub const fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// The registry metrics are created in.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    fn create(&self, name: &str, description: &str, options: MetricOptions) -> Result<Arc<Metric>> {
        let path = self.prefix.scoped(name.split('/'))?;
        self.registry
            .find_or_create(MetricKey::unlabeled(path), description, options)
    }

    /// Finds or creates a counter at `prefix/name`.
    ///
    /// `name` may contain `/` to add several segments at once.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for a malformed name and `IdentityConflict` if the path
    /// already holds another kind.
    pub fn counter(&self, name: &str, description: &str) -> Result<Counter> {
        let metric = self.create(name, description, MetricOptions::Counter)?;
        Ok(Counter::new(metric, self.clone()))
    }

    /// Finds or creates a gauge at `prefix/name`.
    ///
    /// # Errors
    ///
    /// Same as [`Reporter::counter`].
    pub fn gauge(&self, name: &str, description: &str) -> Result<Gauge> {
        let metric = self.create(name, description, MetricOptions::Gauge)?;
        Ok(Gauge::new(metric, self.clone()))
    }

    /// Finds or creates a state at `prefix/name`.
    ///
    /// A non-empty `states` restricts the values [`State::set`] accepts.
    ///
    /// # Errors
    ///
    /// Same as [`Reporter::counter`].
    pub fn state<I, S>(&self, name: &str, description: &str, states: I) -> Result<State>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = states.into_iter().map(Into::into).collect();
        let metric = self.create(name, description, MetricOptions::State { states })?;
        Ok(State::new(metric, self.clone()))
    }

    /// Finds or creates a histogram at `prefix/name`.
    ///
    /// # Errors
    ///
    /// Same as [`Reporter::counter`], plus `InvalidArgument` for an invalid
    /// configuration.
    pub fn histogram(&self, name: &str, description: &str, config: HistogramConfig) -> Result<Histogram> {
        let metric = self.create(name, description, MetricOptions::Histogram(config))?;
        Ok(Histogram::new(metric, self.clone()))
    }

    /// Finds or creates an info metric at `prefix/name`.
    ///
    /// # Errors
    ///
    /// Same as [`Reporter::counter`].
    pub fn info(&self, name: &str, description: &str) -> Result<Info> {
        let metric = self.create(name, description, MetricOptions::Info)?;
        Ok(Info::new(metric, self.clone()))
    }

    /// Finds or creates the metric at `key`, a labeled variant of `origin`.
    ///
    /// The variant inherits the origin's kind, description and options.
    /// Labeled counters are attached to the unlabeled counter at the same
    /// path, which from then on reports their total.
    pub(crate) fn materialize(&self, origin: &Arc<Metric>, key: &MetricKey) -> Result<Arc<Metric>> {
        if origin.key() == key {
            return Ok(Arc::clone(origin));
        }

        let metric = self.registry.find_or_create(
            key.clone(),
            origin.description(),
            origin.options().clone(),
        )?;

        if origin.kind() == MetricKind::Counter && !key.labels.is_empty() {
            let root = self.registry.find_or_create(
                MetricKey::unlabeled(key.path.clone()),
                origin.description(),
                MetricOptions::Counter,
            )?;
            root.attach_child(Arc::clone(&metric));
            debug!(root = %root.key(), child = %metric.key(), "attached labeled counter");
        }

        Ok(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricsError;
    use crate::reading::ReadingValue;
    use crate::types::LabelSet;

    fn reporter(root: &str) -> Reporter {
        Registry::new().reporter(root.parse().unwrap())
    }

    mod scope_tests {
        use super::*;

        #[test]
        fn metrics_are_created_under_prefix() {
            let r = reporter("svc").scoped(["http"]).unwrap();
            let c = r.counter("requests", "").unwrap();
            assert_eq!(c.key().path.to_string(), "svc/http/requests");
        }

        #[test]
        fn name_may_span_segments() {
            let g = reporter("").gauge("disk/free", "").unwrap();
            assert_eq!(g.key().path.segments(), ["disk", "free"]);
        }

        #[test]
        fn malformed_names_fail() {
            let r = reporter("svc");
            assert!(matches!(r.gauge("", ""), Err(MetricsError::InvalidPath { .. })));
            assert!(matches!(r.gauge("a//b", ""), Err(MetricsError::InvalidPath { .. })));
            assert!(r.scoped(["a/b"]).is_err());
        }

        #[test]
        fn scoping_does_not_mutate_parent() {
            let parent = reporter("a");
            let _child = parent.scoped(["b"]).unwrap();
            assert_eq!(parent.prefix().to_string(), "a");
        }
    }

    mod labeled_tests {
        use super::*;

        #[test]
        fn same_labels_yield_same_metric() {
            let c = reporter("").counter("hits", "").unwrap();
            let a = c.labeled("x", "1").unwrap().labeled("y", "2").unwrap();
            let b = c.labeled("y", "2").unwrap().labeled("x", "1").unwrap();
            assert!(Arc::ptr_eq(a.metric().unwrap(), b.metric().unwrap()));
        }

        #[test]
        fn relabeling_with_same_pair_is_noop() {
            let g = reporter("").gauge("temp", "").unwrap();
            let a = g.labeled("room", "attic").unwrap();
            let b = a.labeled("room", "attic").unwrap();
            assert!(Arc::ptr_eq(a.metric().unwrap(), b.metric().unwrap()));
        }

        #[test]
        fn labeled_counters_aggregate_into_root() {
            let r = reporter("");
            let c = r.counter("beacons", "beacons seen").unwrap();
            c.labeled("action", "handled").unwrap().inc().unwrap();
            c.labeled("action", "ignored").unwrap().inc_by(2.0).unwrap();

            assert!(matches!(c.inc(), Err(MetricsError::AggregateWriteError { .. })));

            let total = r.registry().value(c.key()).unwrap();
            assert_eq!(total.value, ReadingValue::Number(3.0));
        }

        #[test]
        fn intermediate_labeled_counter_stays_writable() {
            let c = reporter("").counter("beacons", "").unwrap();
            let mid = c.labeled("a", "1").unwrap();
            let leaf = mid.labeled("b", "2").unwrap();

            leaf.inc().unwrap();
            assert!(mid.inc().is_ok());
            assert!(c.metric().unwrap().is_aggregation_root());
        }

        #[test]
        fn labeled_state_keeps_restriction() {
            let s = reporter("")
                .state("mode", "", ["on", "off"])
                .unwrap()
                .labeled("dev", "7")
                .unwrap();
            assert!(s.set("on").is_ok());
            assert!(s.set("auto").is_err());
        }

        #[test]
        fn labeled_kind_collision_is_reported() {
            let r = reporter("");
            r.gauge("x", "").unwrap();
            let key = MetricKey::new(
                "x".parse().unwrap(),
                LabelSet::from_pairs([("k", "v")]).unwrap(),
            );
            r.registry()
                .find_or_create(key, "", MetricOptions::Counter)
                .unwrap();

            let variant = r.gauge("x", "").unwrap().labeled("k", "v").unwrap();
            assert!(matches!(
                variant.set(1.0),
                Err(MetricsError::IdentityConflict { .. })
            ));
            assert!(matches!(
                variant.metric(),
                Err(MetricsError::IdentityConflict { .. })
            ));
        }
    }
}
