//! Metric variants and their value storage.
//!
//! A [`Metric`] is a single tagged value holder. Its variant is fixed at
//! creation and every operation dispatches on the tag. Each metric owns its
//! own lock, so producers writing different metrics never contend, and none
//! of these operations touch the registry lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MetricsError, Result};
use crate::histogram::{HistogramConfig, Sampler};
use crate::reading::{Reading, ReadingValue};
use crate::types::{LabelSet, MetricKey, MetricKind, Path, now_millis};

/// A caller-supplied value function evaluated at collection time.
pub type ValueFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Creation options, one per metric kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MetricOptions {
    /// A monotonic counter.
    #[default]
    Counter,
    /// A settable gauge.
    Gauge,
    /// A state; a non-empty list restricts the accepted values.
    State {
        /// Allowed states, empty for unrestricted.
        states: Vec<String>,
    },
    /// A windowed histogram.
    Histogram(HistogramConfig),
    /// A set of string fields.
    Info,
}

impl MetricOptions {
    /// The kind these options create.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Counter => MetricKind::Counter,
            Self::Gauge => MetricKind::Gauge,
            Self::State { .. } => MetricKind::State,
            Self::Histogram(_) => MetricKind::Histogram,
            Self::Info => MetricKind::Info,
        }
    }
}

#[derive(Debug, Default)]
struct CounterState {
    value: f64,
    updated_at: Option<i64>,
}

#[derive(Debug, Default)]
struct CounterCell {
    state: Mutex<CounterState>,
    children: Mutex<Vec<Arc<Metric>>>,
}

#[derive(Default)]
enum GaugeSource {
    #[default]
    Unset,
    Direct,
    Function(ValueFn),
}

impl fmt::Debug for GaugeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Direct => f.write_str("Direct"),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[derive(Debug, Default)]
struct GaugeState {
    value: f64,
    updated_at: Option<i64>,
    source: GaugeSource,
}

#[derive(Debug, Default)]
struct StateCell {
    current: Option<String>,
    known: BTreeSet<String>,
    restricted: bool,
    updated_at: Option<i64>,
}

#[derive(Debug, Default)]
struct InfoCell {
    fields: BTreeMap<String, String>,
    updated_at: Option<i64>,
}

#[derive(Debug)]
enum MetricData {
    Counter(CounterCell),
    Gauge(Mutex<GaugeState>),
    State(Mutex<StateCell>),
    Histogram(Sampler),
    Info(Mutex<InfoCell>),
}

/// A registered metric: identity, description and current value(s).
#[derive(Debug)]
pub struct Metric {
    key: MetricKey,
    description: String,
    options: MetricOptions,
    data: MetricData,
}

impl Metric {
    /// Creates a metric of the kind described by `options`.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidPath` for the root path and
    /// `MetricsError::InvalidArgument` for an invalid histogram configuration.
    pub fn new(key: MetricKey, description: impl Into<String>, options: MetricOptions) -> Result<Self> {
        if key.path.is_root() {
            return Err(MetricsError::InvalidPath {
                reason: "metric path cannot be empty".to_string(),
            });
        }

        let data = match &options {
            MetricOptions::Counter => MetricData::Counter(CounterCell::default()),
            MetricOptions::Gauge => MetricData::Gauge(Mutex::default()),
            MetricOptions::State { states } => MetricData::State(Mutex::new(StateCell {
                known: states.iter().cloned().collect(),
                restricted: !states.is_empty(),
                ..StateCell::default()
            })),
            MetricOptions::Histogram(config) => MetricData::Histogram(Sampler::new(config.clone())?),
            MetricOptions::Info => MetricData::Info(Mutex::default()),
        };

        Ok(Self {
            key,
            description: description.into(),
            options,
            data,
        })
    }

    /// The registry key.
    #[must_use]
    pub const fn key(&self) -> &MetricKey {
        &self.key
    }

    /// The metric's path.
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.key.path
    }

    /// The metric's labels.
    #[must_use]
    pub const fn labels(&self) -> &LabelSet {
        &self.key.labels
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The options this metric was created with.
    #[must_use]
    pub const fn options(&self) -> &MetricOptions {
        &self.options
    }

    /// The metric's kind.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.options.kind()
    }

    fn wrong_kind(&self, expected: MetricKind) -> MetricsError {
        MetricsError::invalid_argument(format!(
            "{} is a {}, not a {expected}",
            self.key,
            self.kind()
        ))
    }

    // --- counter -------------------------------------------------------

    /// Adds `amount` to a counter.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-positive or non-finite amount,
    /// `AggregateWriteError` if this counter has labeled children.
    pub fn inc_counter(&self, amount: f64) -> Result<()> {
        let MetricData::Counter(cell) = &self.data else {
            return Err(self.wrong_kind(MetricKind::Counter));
        };

        if !(amount.is_finite() && amount > 0.0) {
            return Err(MetricsError::invalid_argument(format!(
                "counter increment must be positive, got {amount}"
            )));
        }

        // Held through the update so a child cannot attach mid-write.
        let children = cell.children.lock();
        if !children.is_empty() {
            return Err(MetricsError::AggregateWriteError {
                key: self.key.to_string(),
            });
        }

        let mut state = cell.state.lock();
        state.value += amount;
        state.updated_at = Some(now_millis());
        Ok(())
    }

    /// Registers `child` as a labeled variant of this counter.
    pub(crate) fn attach_child(&self, child: Arc<Self>) {
        if let MetricData::Counter(cell) = &self.data {
            let mut children = cell.children.lock();
            if !children.iter().any(|c| Arc::ptr_eq(c, &child)) {
                children.push(child);
            }
        }
    }

    /// True for a counter that has labeled children.
    #[must_use]
    pub fn is_aggregation_root(&self) -> bool {
        matches!(&self.data, MetricData::Counter(cell) if !cell.children.lock().is_empty())
    }

    // --- gauge ---------------------------------------------------------

    fn update_gauge(&self, at: i64, update: impl FnOnce(f64) -> f64) -> Result<()> {
        let MetricData::Gauge(gauge) = &self.data else {
            return Err(self.wrong_kind(MetricKind::Gauge));
        };

        let mut state = gauge.lock();
        if matches!(state.source, GaugeSource::Function(_)) {
            return Err(MetricsError::ConflictingValueSource {
                key: self.key.to_string(),
            });
        }
        state.value = update(state.value);
        state.updated_at = Some(at);
        state.source = GaugeSource::Direct;
        Ok(())
    }

    /// Sets a gauge at an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// `ConflictingValueSource` if a value function is installed.
    pub fn set_gauge_at(&self, value: f64, at: i64) -> Result<()> {
        self.update_gauge(at, |_| value)
    }

    /// Adds `delta` (possibly negative) to a gauge.
    ///
    /// # Errors
    ///
    /// `ConflictingValueSource` if a value function is installed.
    pub fn add_gauge(&self, delta: f64) -> Result<()> {
        self.update_gauge(now_millis(), |v| v + delta)
    }

    /// Drives a gauge from `f`, evaluated on every collection.
    ///
    /// # Errors
    ///
    /// `ConflictingValueSource` if the gauge was already set directly or
    /// already has a function.
    pub fn set_gauge_fn(&self, f: ValueFn) -> Result<()> {
        let MetricData::Gauge(gauge) = &self.data else {
            return Err(self.wrong_kind(MetricKind::Gauge));
        };

        let mut state = gauge.lock();
        if !matches!(state.source, GaugeSource::Unset) {
            return Err(MetricsError::ConflictingValueSource {
                key: self.key.to_string(),
            });
        }
        state.source = GaugeSource::Function(f);
        Ok(())
    }

    // --- state ---------------------------------------------------------

    /// Sets the current state at an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the state is restricted and `value` is not a
    /// member of its allowed set.
    pub fn set_state_at(&self, value: &str, at: i64) -> Result<()> {
        let MetricData::State(cell) = &self.data else {
            return Err(self.wrong_kind(MetricKind::State));
        };

        let mut cell = cell.lock();
        if cell.restricted && !cell.known.contains(value) {
            return Err(MetricsError::invalid_argument(format!(
                "state '{value}' is not one of {:?} for {}",
                cell.known, self.key
            )));
        }
        cell.known.insert(value.to_string());
        cell.current = Some(value.to_string());
        cell.updated_at = Some(at);
        Ok(())
    }

    /// Every state this metric has been allowed or has taken.
    #[must_use]
    pub fn known_states(&self) -> Vec<String> {
        match &self.data {
            MetricData::State(cell) => cell.lock().known.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    // --- histogram -----------------------------------------------------

    /// The sampler behind a histogram.
    #[must_use]
    pub const fn sampler(&self) -> Option<&Sampler> {
        match &self.data {
            MetricData::Histogram(sampler) => Some(sampler),
            _ => None,
        }
    }

    /// Records a histogram sample at an explicit millisecond timestamp.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for non-finite samples.
    pub fn record_at(&self, value: f64, at: i64) -> Result<()> {
        self.sampler()
            .ok_or_else(|| self.wrong_kind(MetricKind::Histogram))?
            .record_at(value, at)
    }

    // --- info ----------------------------------------------------------

    /// Replaces the fields of an info metric.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any field name is empty.
    pub fn set_info(&self, fields: BTreeMap<String, String>) -> Result<()> {
        let MetricData::Info(cell) = &self.data else {
            return Err(self.wrong_kind(MetricKind::Info));
        };
        if fields.keys().any(String::is_empty) {
            return Err(MetricsError::invalid_argument("info field names cannot be empty"));
        }

        let mut cell = cell.lock();
        cell.fields = fields;
        cell.updated_at = Some(now_millis());
        Ok(())
    }

    // --- collection ----------------------------------------------------

    /// Scalar value of a counter or gauge, without evaluating value functions.
    #[must_use]
    pub fn peek(&self) -> Option<f64> {
        match &self.data {
            MetricData::Counter(cell) => Some(cell.state.lock().value),
            MetricData::Gauge(gauge) => Some(gauge.lock().value),
            _ => None,
        }
    }

    /// Last write time in milliseconds, `None` if never written.
    #[must_use]
    pub fn updated_at(&self) -> Option<i64> {
        match &self.data {
            MetricData::Counter(cell) => cell.state.lock().updated_at,
            MetricData::Gauge(gauge) => gauge.lock().updated_at,
            MetricData::State(cell) => cell.lock().updated_at,
            MetricData::Histogram(sampler) => sampler.last_record_at(),
            MetricData::Info(cell) => cell.lock().updated_at,
        }
    }

    fn reading(&self, value: ReadingValue, timestamp: Option<i64>) -> Reading {
        Reading {
            kind: self.kind(),
            path: self.key.path.clone(),
            labels: self.key.labels.clone(),
            value,
            description: self.description.clone(),
            timestamp,
        }
    }

    /// Materializes this metric's reading as of `now`.
    ///
    /// Value functions are evaluated here. An aggregation root reports the
    /// sum of its own pre-aggregation value and all of its children,
    /// stamped with the newest child write.
    pub(crate) fn collect(&self, now: i64) -> Reading {
        match &self.data {
            MetricData::Counter(cell) => {
                let (own, own_at) = {
                    let state = cell.state.lock();
                    (state.value, state.updated_at)
                };
                let children = cell.children.lock().clone();

                if children.is_empty() || children.iter().any(|c| c.labels().is_empty()) {
                    return self.reading(ReadingValue::Number(own), own_at);
                }

                let (total, at) = children.iter().fold((own, own_at), |(sum, at), child| {
                    (
                        sum + child.peek().unwrap_or(0.0),
                        at.max(child.updated_at()),
                    )
                });
                self.reading(ReadingValue::Number(total), at)
            }
            MetricData::Gauge(gauge) => {
                let f = match &gauge.lock().source {
                    GaugeSource::Function(f) => Some(Arc::clone(f)),
                    _ => None,
                };

                // The function runs without the gauge lock held.
                if let Some(f) = f {
                    let value = f();
                    let mut state = gauge.lock();
                    state.value = value;
                    state.updated_at = Some(now);
                }

                let state = gauge.lock();
                self.reading(ReadingValue::Number(state.value), state.updated_at)
            }
            MetricData::State(cell) => {
                let cell = cell.lock();
                self.reading(
                    ReadingValue::State {
                        current: cell.current.clone(),
                        states: cell.known.iter().cloned().collect(),
                    },
                    cell.updated_at,
                )
            }
            MetricData::Histogram(sampler) => {
                let snapshot = sampler.read();
                self.reading(ReadingValue::Histogram(snapshot), sampler.last_record_at())
            }
            MetricData::Info(cell) => {
                let cell = cell.lock();
                self.reading(ReadingValue::Info(cell.fields.clone()), cell.updated_at)
            }
        }
    }
}
