//! Point-in-time readings produced by collection.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::histogram::HistogramSnapshot;
use crate::types::{LabelSet, MetricKind, Path};

/// The value part of a [`Reading`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingValue {
    /// Counter or gauge value.
    Number(f64),
    /// Current state and every known state.
    State {
        /// The current state, `None` if never set.
        current: Option<String>,
        /// Known states in sorted order.
        states: Vec<String>,
    },
    /// Windowed histogram summary.
    Histogram(HistogramSnapshot),
    /// Info fields.
    Info(BTreeMap<String, String>),
}

/// One metric's exported value at collection time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// The metric kind.
    pub kind: MetricKind,
    /// Path, relative to the collection prefix.
    pub path: Path,
    /// Labels, in canonical order.
    pub labels: LabelSet,
    /// The value.
    pub value: ReadingValue,
    /// Description given at registration.
    pub description: String,
    /// Last update in milliseconds since the epoch, `None` if never written.
    pub timestamp: Option<i64>,
}

impl Reading {
    /// The scalar value of a counter or gauge reading.
    #[must_use]
    pub const fn number(&self) -> Option<f64> {
        match self.value {
            ReadingValue::Number(v) => Some(v),
            _ => None,
        }
    }

    /// True if this reading was updated strictly after `since`.
    #[must_use]
    pub fn is_newer_than(&self, since: i64) -> bool {
        self.timestamp.is_some_and(|ts| ts > since)
    }
}
