//! Batched, incremental push export.
//!
//! Each cycle collects only the readings updated since the previous cycle,
//! groups them by parent path and hands one JSON payload per group to a
//! [`Transport`]. The cycle boundary advances whether or not publishing
//! succeeds, so a failed payload is dropped rather than retried. A cycle
//! re-reads the millisecond of the previous collection, so a write stamped
//! in that millisecond may be published twice but is never skipped.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::handle::Counter;
use crate::histogram::{HistogramSnapshot, Summary};
use crate::reading::{Reading, ReadingValue};
use crate::registry::{CollectFilter, Registry};
use crate::reporter::Reporter;
use crate::types::{Path, now_millis};

/// A failed publish.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying writer or connection failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker refused the message.
    #[error("publish rejected: {reason}")]
    Rejected {
        /// Why it was refused.
        reason: String,
    },
}

/// Destination for `(topic, payload)` pairs.
pub trait Transport: Send + Sync {
    /// Publishes one payload. No retry is expected.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = std::result::Result<(), TransportError>> + Send;
}

/// Outcome of one push cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Readings collected this cycle.
    pub readings: usize,
    /// Payloads accepted by the transport.
    pub published: usize,
    /// Payloads the transport failed to publish.
    pub dropped: usize,
}

#[derive(Debug)]
struct OutcomeCounters {
    published: Counter,
    dropped: Counter,
}

impl OutcomeCounters {
    /// True if `reading`, collected under `prefix`, is one of these counters.
    fn owns(&self, reading: &Reading, prefix: &Path) -> bool {
        reading.labels.is_empty()
            && [&self.published, &self.dropped].iter().any(|counter| {
                let path = &counter.key().path;
                path.starts_with(prefix) && path.stripped(prefix) == reading.path
            })
    }
}

/// Periodically publishes changed readings through a [`Transport`].
#[derive(Debug)]
pub struct PushExporter<T> {
    registry: Registry,
    transport: T,
    prefix: Path,
    topic_prefix: String,
    last_publish: Mutex<Option<i64>>,
    counters: Option<OutcomeCounters>,
}

impl<T: Transport> PushExporter<T> {
    /// Creates an exporter over every metric in `registry`.
    #[must_use]
    pub fn new(registry: Registry, transport: T) -> Self {
        Self {
            registry,
            transport,
            prefix: Path::root(),
            topic_prefix: String::new(),
            last_publish: Mutex::new(None),
            counters: None,
        }
    }

    /// Only exports metrics under `prefix`, with the prefix stripped.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Path) -> Self {
        self.prefix = prefix;
        self
    }

    /// Prepends `topic_prefix` to every topic.
    #[must_use]
    pub fn with_topic_prefix(mut self, topic_prefix: impl Into<String>) -> Self {
        self.topic_prefix = topic_prefix.into().trim_matches('/').to_string();
        self
    }

    /// Counts publish outcomes in `push/published` and `push/dropped`
    /// under `reporter`. The exporter never publishes these counters itself.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::IdentityConflict` if those paths hold other kinds.
    pub fn with_outcome_counters(mut self, reporter: &Reporter) -> Result<Self> {
        let push = reporter.scoped(["push"])?;
        self.counters = Some(OutcomeCounters {
            published: push.counter("published", "payloads accepted by the transport")?,
            dropped: push.counter("dropped", "payloads the transport failed to publish")?,
        });
        Ok(self)
    }

    /// The transport payloads are handed to.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Time of the most recent collection in milliseconds.
    #[must_use]
    pub fn last_publish(&self) -> Option<i64> {
        *self.last_publish.lock()
    }

    /// Consumes the exporter, returning its transport.
    #[must_use]
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Runs one cycle: collect changes since the last cycle and publish them.
    pub async fn publish_once(&self) -> PushReport {
        let now = now_millis();
        let since = self.last_publish.lock().replace(now).map(|last| last - 1);

        let mut readings = self.registry.collect(&CollectFilter {
            prefix: self.prefix.clone(),
            since,
        });
        if let Some(counters) = &self.counters {
            readings.retain(|reading| !counters.owns(reading, &self.prefix));
        }
        let batches = batch(&readings, &self.topic_prefix);

        let mut report = PushReport {
            readings: readings.len(),
            ..PushReport::default()
        };

        for (topic, payload) in batches {
            match self.transport.publish(&topic, payload).await {
                Ok(()) => {
                    report.published += 1;
                    if let Some(counters) = &self.counters {
                        let _ = counters.published.inc();
                    }
                }
                Err(e) => {
                    report.dropped += 1;
                    warn!(topic = %topic, error = %e, "failed to publish metrics");
                    if let Some(counters) = &self.counters {
                        let _ = counters.dropped.inc();
                    }
                }
            }
        }

        debug!(
            since = ?since,
            readings = report.readings,
            published = report.published,
            dropped = report.dropped,
            "push cycle complete"
        );
        report
    }

    /// Publishes every `period` until `shutdown` turns true.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), prefix = %self.prefix, "push exporter started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("push exporter shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Groups readings by parent path into `(topic, JSON payload)` pairs.
///
/// Keys within a payload are the leaf name followed by the label set, e.g.
/// `rssi{device="a"}`.
#[must_use]
pub fn batch(readings: &[Reading], topic_prefix: &str) -> Vec<(String, Vec<u8>)> {
    let mut groups: BTreeMap<String, Map<String, Value>> = BTreeMap::new();

    for reading in readings {
        let leaf = reading.path.name().unwrap_or_default();
        let group = reading.path.parent().join("/");
        let topic = match (topic_prefix.is_empty(), group.is_empty()) {
            (true, true) => leaf.to_string(),
            (true, false) => group,
            (false, true) => topic_prefix.to_string(),
            (false, false) => format!("{topic_prefix}/{group}"),
        };

        groups
            .entry(topic)
            .or_default()
            .insert(format!("{leaf}{}", reading.labels), payload_value(&reading.value));
    }

    groups
        .into_iter()
        .map(|(topic, values)| (topic, Value::Object(values).to_string().into_bytes()))
        .collect()
}

fn round2(value: f64) -> Value {
    json!((value * 100.0).round() / 100.0)
}

fn payload_value(value: &ReadingValue) -> Value {
    match value {
        ReadingValue::Number(v) => round2(*v),
        ReadingValue::State { current, .. } => current.clone().map_or(Value::Null, Value::String),
        ReadingValue::Histogram(snapshot) => histogram_value(snapshot),
        ReadingValue::Info(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    }
}

fn histogram_value(snapshot: &HistogramSnapshot) -> Value {
    let mut object = Map::new();
    object.insert("count".to_string(), json!(snapshot.count));
    if let (Some(min), Some(max)) = (snapshot.min, snapshot.max) {
        object.insert("min".to_string(), round2(min));
        object.insert("max".to_string(), round2(max));
    }
    match &snapshot.summary {
        Summary::Quantiles(quantiles) => {
            for (name, value) in quantiles {
                object.insert((*name).to_string(), round2(*value));
            }
        }
        Summary::Buckets(buckets) => {
            for bucket in buckets {
                let key = bucket
                    .upper
                    .map_or_else(|| "+Inf".to_string(), |upper| upper.to_string());
                object.insert(key, json!(bucket.fraction));
            }
        }
    }
    Value::Object(object)
}
