//! In-process metric registry for device telemetry.
//!
//! `beacon-metrics` keeps counters, gauges, states, windowed histograms and
//! info metrics in a concurrent registry keyed by hierarchical path and
//! label set. Producers write through typed handles; exporters pull ordered
//! snapshots on their own schedule.
//!
//! # Features
//!
//! - **Stable identity**: one metric per `(path, labels)`, find-or-create
//! - **Label aggregation**: labeled counters roll up into an unlabeled total
//! - **Windowed histograms**: bounded circular buffers with quantile or bucket reads
//! - **Exporters**: OpenMetrics text for scrapes, batched JSON for push
//!
//! # Example
//!
//! ```rust
//! use beacon_metrics::{Registry, Path, export};
//!
//! let registry = Registry::new();
//! let reporter = registry.reporter(Path::root()).scoped(["garage"]).unwrap();
//!
//! let beacons = reporter.counter("beacons", "Beacons received").unwrap();
//! beacons.labeled("action", "handled").unwrap().inc().unwrap();
//!
//! reporter.gauge("door/temperature", "Door sensor temperature").unwrap().set(18.5).unwrap();
//!
//! let text = export::render_registry(&registry);
//! assert!(text.contains("garage_beacons_total{action=\"handled\"} 1"));
//! assert!(text.ends_with("# EOF\n"));
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/beacon-metrics/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod export;
pub mod handle;
pub mod histogram;
pub mod ingest;
pub mod metric;
pub mod reading;
pub mod registry;
pub mod reporter;
pub mod types;

// Re-export main types at crate root
pub use error::{MetricsError, Result};
pub use handle::{Counter, Gauge, Histogram, Info, State};
pub use histogram::{HistogramConfig, HistogramSnapshot, ReadMode, Sampler};
pub use ingest::{DecodedEvent, EventOutcome, FieldValue, IngestPolicy, Ingestor};
pub use metric::{Metric, MetricOptions};
pub use reading::{Reading, ReadingValue};
pub use registry::{CollectFilter, Registry};
pub use reporter::Reporter;
pub use types::{LabelSet, MetricKey, MetricKind, Path, now_millis};

/// A reporter on the process-wide default registry rooted at `root`.
#[must_use]
pub fn reporter(root: Path) -> Reporter {
    Registry::global().reporter(root)
}
