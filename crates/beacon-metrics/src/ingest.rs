//! The decoder boundary: turning decoded device events into metric writes.
//!
//! Decoders classify every field up front as a [`FieldValue`]. The
//! [`Ingestor`] maps numeric fields to gauges and enum-like fields to
//! states under a per-device scope. Anything it cannot place is counted as
//! unhandled and dropped; ingestion never fails on bad data. When enabled,
//! the received signal strength of handled events feeds a histogram.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::handle::{Counter, Histogram};
use crate::histogram::HistogramConfig;
use crate::reporter::Reporter;
use crate::types::now_millis;

/// A pre-classified field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Reported as a gauge.
    Numeric(f64),
    /// Reported as a state, lowercased.
    Enum(String),
    /// Counted as unhandled.
    Unknown,
}

impl From<&serde_json::Value> for FieldValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Unknown, Self::Numeric),
            serde_json::Value::Bool(b) => Self::Numeric(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::String(s) => Self::Enum(s.clone()),
            _ => Self::Unknown,
        }
    }
}

/// One decoded observation from a device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedEvent {
    /// Device name, used as a path segment.
    pub device: String,
    /// Field name to value.
    pub fields: BTreeMap<String, FieldValue>,
    /// Received signal strength in dBm, when the receiver reports it.
    pub rssi: Option<f64>,
}

#[derive(Deserialize)]
struct RawEvent {
    device: String,
    #[serde(default)]
    fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    rssi: Option<f64>,
}

impl DecodedEvent {
    /// Parses a `{"device": "...", "fields": {...}, "rssi": -70}` JSON
    /// object; `rssi` is optional.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        let raw: RawEvent = serde_json::from_str(line)?;
        Ok(Self {
            device: raw.device,
            fields: raw
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from(v)))
                .collect(),
            rssi: raw.rssi,
        })
    }
}

/// How an event was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Fields were written to metrics.
    Handled,
    /// Unknown device, bad name or nothing decoded.
    Ignored,
    /// Dropped because the device reported too recently.
    Throttled,
}

impl EventOutcome {
    /// Label value used on the beacon counter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handled => "handled",
            Self::Ignored => "ignored",
            Self::Throttled => "throttled",
        }
    }
}

/// Which devices are accepted and how often.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestPolicy {
    /// Accepted device names; empty accepts every device.
    pub devices: HashSet<String>,
    /// Minimum time between handled events from one device.
    pub throttle: Duration,
}

/// Writes decoded events into a registry.
#[derive(Debug)]
pub struct Ingestor {
    devices: Reporter,
    policy: IngestPolicy,
    handled: Counter,
    ignored: Counter,
    throttled: Counter,
    unhandled: Counter,
    signal: Option<Histogram>,
    throttle_until: Mutex<HashMap<String, i64>>,
}

impl Ingestor {
    /// Creates an ingestor writing device metrics under `devices` and its
    /// own diagnostics (`beacons`, `unhandled`) under `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::IdentityConflict` if the diagnostic paths are
    /// already taken by other kinds.
    pub fn new(devices: Reporter, diagnostics: &Reporter, policy: IngestPolicy) -> Result<Self> {
        let beacons = diagnostics.counter("beacons", "How each beacon was processed")?;
        Ok(Self {
            devices,
            policy,
            handled: beacons.labeled("action", EventOutcome::Handled.as_str())?,
            ignored: beacons.labeled("action", EventOutcome::Ignored.as_str())?,
            throttled: beacons.labeled("action", EventOutcome::Throttled.as_str())?,
            unhandled: diagnostics.counter("unhandled", "Beacon data that could not become a metric")?,
            signal: None,
            throttle_until: Mutex::new(HashMap::new()),
        })
    }

    /// Records the signal strength of handled events in `rssi` under
    /// `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the path is taken
    /// by another kind.
    pub fn with_signal_histogram(mut self, diagnostics: &Reporter, config: HistogramConfig) -> Result<Self> {
        self.signal = Some(diagnostics.histogram(
            "rssi",
            "Received signal strength of handled beacons in dBm",
            config,
        )?);
        Ok(self)
    }

    /// Processes one event and counts its outcome.
    pub fn ingest(&self, event: &DecodedEvent) -> EventOutcome {
        let outcome = self.process(event);
        let counter = match outcome {
            EventOutcome::Handled => &self.handled,
            EventOutcome::Ignored => &self.ignored,
            EventOutcome::Throttled => &self.throttled,
        };
        let _ = counter.inc();
        outcome
    }

    fn process(&self, event: &DecodedEvent) -> EventOutcome {
        if !self.policy.devices.is_empty() && !self.policy.devices.contains(&event.device) {
            return EventOutcome::Ignored;
        }

        let now = now_millis();
        if self.should_throttle(&event.device, now) {
            return EventOutcome::Throttled;
        }

        if event.fields.is_empty() {
            return EventOutcome::Ignored;
        }

        let scoped = match self.devices.scoped([event.device.as_str()]) {
            Ok(scoped) => scoped,
            Err(e) => {
                warn!(device = %event.device, error = %e, "ignoring event from unnamed device");
                return EventOutcome::Ignored;
            }
        };

        for (name, value) in &event.fields {
            let written = match value {
                FieldValue::Numeric(v) => scoped
                    .gauge(name, "")
                    .and_then(|g| g.set_at(round3(*v), now)),
                FieldValue::Enum(s) => scoped
                    .state(name, "", Vec::<String>::new())
                    .and_then(|st| st.set_at(&s.to_lowercase(), now)),
                FieldValue::Unknown => {
                    debug!(device = %event.device, field = %name, "unhandled field value");
                    let _ = self.unhandled.inc();
                    continue;
                }
            };

            if let Err(e) = written {
                warn!(device = %event.device, field = %name, error = %e, "field could not be recorded");
                let _ = self.unhandled.inc();
            }
        }

        if let (Some(signal), Some(rssi)) = (&self.signal, event.rssi) {
            if let Err(e) = signal.record_at(rssi, now) {
                debug!(device = %event.device, error = %e, "signal strength not recorded");
            }
        }

        EventOutcome::Handled
    }

    fn should_throttle(&self, device: &str, now: i64) -> bool {
        if self.policy.throttle.is_zero() {
            return false;
        }

        let mut until = self.throttle_until.lock();
        if until.get(device).is_some_and(|&expire| now <= expire) {
            return true;
        }
        until.retain(|_, expire| *expire >= now);
        until.insert(device.to_string(), now + self.policy.throttle.as_millis() as i64);
        false
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
