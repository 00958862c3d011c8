//! Typed handles returned by a [`Reporter`].
//!
//! Handles are cheap to clone and safe to share across threads. Each one
//! targets a [`MetricKey`] through the reporter that created it, so
//! `labeled` variants land in the same registry. A labeled variant is
//! registered when it is first used, not when it is derived.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::histogram::{HistogramSnapshot, Sampler};
use crate::metric::{Metric, MetricOptions};
use crate::reporter::Reporter;
use crate::types::{MetricKey, now_millis};

/// Where a handle writes: the metric it was derived from, the key it
/// targets and, once resolved, the registered metric at that key.
#[derive(Debug, Clone)]
struct Binding {
    reporter: Reporter,
    origin: Arc<Metric>,
    key: MetricKey,
    resolved: Arc<OnceCell<Arc<Metric>>>,
}

impl Binding {
    fn new(metric: Arc<Metric>, reporter: Reporter) -> Self {
        let resolved = OnceCell::new();
        let key = metric.key().clone();
        let _ = resolved.set(Arc::clone(&metric));
        Self {
            reporter,
            origin: metric,
            key,
            resolved: Arc::new(resolved),
        }
    }

    fn labeled(&self, key: &str, value: &str) -> Result<Self> {
        match self.key.labels.labeled(key, value)? {
            Cow::Borrowed(_) => Ok(self.clone()),
            Cow::Owned(labels) => Ok(Self {
                reporter: self.reporter.clone(),
                origin: Arc::clone(&self.origin),
                key: MetricKey::new(self.key.path.clone(), labels),
                resolved: Arc::new(OnceCell::new()),
            }),
        }
    }

    fn resolve(&self) -> Result<&Arc<Metric>> {
        self.resolved
            .get_or_try_init(|| self.reporter.materialize(&self.origin, &self.key))
    }

    /// The registered metric, without registering it.
    fn current(&self) -> Option<Arc<Metric>> {
        self.resolved
            .get()
            .cloned()
            .or_else(|| self.reporter.registry().get(&self.key))
    }
}

macro_rules! handle_common {
    ($handle:ident) => {
        impl $handle {
            pub(crate) fn new(metric: Arc<Metric>, reporter: Reporter) -> Self {
                Self {
                    binding: Binding::new(metric, reporter),
                }
            }

            /// Returns the variant of this metric with `key` set to `value`.
            ///
            /// The variant is registered on its first use, so chaining
            /// `labeled` calls only registers the final label set. Calling it
            /// with a pair already present returns an equivalent handle.
            ///
            /// # Errors
            ///
            /// Returns `MetricsError::InvalidArgument` for an empty key.
            pub fn labeled(&self, key: &str, value: &str) -> Result<Self> {
                Ok(Self {
                    binding: self.binding.labeled(key, value)?,
                })
            }

            /// The underlying metric, registering it if needed.
            ///
            /// # Errors
            ///
            /// Returns `MetricsError::IdentityConflict` if the key is taken
            /// by another kind.
            pub fn metric(&self) -> Result<&Arc<Metric>> {
                self.binding.resolve()
            }

            /// The registry key.
            #[must_use]
            pub fn key(&self) -> &MetricKey {
                &self.binding.key
            }
        }
    };
}

/// A monotonically increasing count.
#[derive(Debug, Clone)]
pub struct Counter {
    binding: Binding,
}

handle_common!(Counter);

impl Counter {
    /// Adds one.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::AggregateWriteError` if this counter has
    /// labeled children.
    pub fn inc(&self) -> Result<()> {
        self.binding.resolve()?.inc_counter(1.0)
    }

    /// Adds `amount`, which must be positive.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` for a non-positive amount and
    /// `MetricsError::AggregateWriteError` for an aggregation root.
    pub fn inc_by(&self, amount: f64) -> Result<()> {
        self.binding.resolve()?.inc_counter(amount)
    }

    /// The counter's own value, excluding labeled children.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.binding.current().and_then(|m| m.peek()).unwrap_or_default()
    }
}

/// A value that can go up and down.
#[derive(Debug, Clone)]
pub struct Gauge {
    binding: Binding,
}

handle_common!(Gauge);

impl Gauge {
    /// Sets the value, stamped now.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::ConflictingValueSource` if a value function
    /// drives this gauge.
    pub fn set(&self, value: f64) -> Result<()> {
        self.binding.resolve()?.set_gauge_at(value, now_millis())
    }

    /// Sets the value with an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`Gauge::set`].
    pub fn set_at(&self, value: f64, at_millis: i64) -> Result<()> {
        self.binding.resolve()?.set_gauge_at(value, at_millis)
    }

    /// Adds `delta`.
    ///
    /// # Errors
    ///
    /// Same as [`Gauge::set`].
    pub fn inc(&self, delta: f64) -> Result<()> {
        self.binding.resolve()?.add_gauge(delta)
    }

    /// Subtracts `delta`.
    ///
    /// # Errors
    ///
    /// Same as [`Gauge::set`].
    pub fn dec(&self, delta: f64) -> Result<()> {
        self.binding.resolve()?.add_gauge(-delta)
    }

    /// Drives the gauge from `f`, called on every collection.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::ConflictingValueSource` if the gauge was
    /// already written directly or has a function.
    pub fn set_function<F>(&self, f: F) -> Result<()>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.binding.resolve()?.set_gauge_fn(Arc::new(f))
    }

    /// The last stored value. Function-driven gauges report the value from
    /// the most recent collection.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.binding.current().and_then(|m| m.peek()).unwrap_or_default()
    }
}

/// A discrete current value drawn from a set of named states.
#[derive(Debug, Clone)]
pub struct State {
    binding: Binding,
}

handle_common!(State);

impl State {
    /// Sets the current state, stamped now.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` if this state is restricted
    /// and `value` is not allowed.
    pub fn set(&self, value: &str) -> Result<()> {
        self.binding.resolve()?.set_state_at(value, now_millis())
    }

    /// Sets the current state with an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`State::set`].
    pub fn set_at(&self, value: &str, at_millis: i64) -> Result<()> {
        self.binding.resolve()?.set_state_at(value, at_millis)
    }

    /// Every allowed or observed state.
    #[must_use]
    pub fn known_states(&self) -> Vec<String> {
        match self.binding.current() {
            Some(metric) => metric.known_states(),
            None => match self.binding.origin.options() {
                MetricOptions::State { states } => {
                    states.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
                }
                _ => Vec::new(),
            },
        }
    }
}

/// A windowed distribution of samples.
#[derive(Debug, Clone)]
pub struct Histogram {
    binding: Binding,
}

handle_common!(Histogram);

impl Histogram {
    /// Records a sample, stamped now.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` for non-finite values.
    pub fn record(&self, value: f64) -> Result<()> {
        self.binding.resolve()?.record_at(value, now_millis())
    }

    /// Records a sample with an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`Histogram::record`].
    pub fn record_at(&self, value: f64, at_millis: i64) -> Result<()> {
        self.binding.resolve()?.record_at(value, at_millis)
    }

    /// Summarizes the configured window ending now.
    #[must_use]
    pub fn snapshot(&self) -> Option<HistogramSnapshot> {
        self.binding
            .current()
            .and_then(|m| m.sampler().map(Sampler::read))
    }
}

/// A set of descriptive string fields, such as build metadata.
#[derive(Debug, Clone)]
pub struct Info {
    binding: Binding,
}

handle_common!(Info);

impl Info {
    /// Replaces the fields.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` if a field name is empty.
    pub fn set<I, K, V>(&self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: BTreeMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.binding.resolve()?.set_info(fields)
    }
}
