//! Bridge from decoded device beacons to scrape and push exporters.
//!
//! `beacon-bridge` reads decoded events, records them in a
//! [`beacon_metrics::Registry`], serves the registry as OpenMetrics text and
//! periodically pushes changed values through a line transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod server;
pub mod source;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use server::create_router;
pub use source::{LineSource, SourceStats};
pub use transport::LineTransport;

use beacon_metrics::export::{PushExporter, Transport};
use beacon_metrics::{Registry, Reporter, now_millis};

/// Registers the bootstrap metrics: process start time and build info.
///
/// # Errors
///
/// Returns an error if the paths are already taken by other kinds.
pub fn register_process_metrics(reporter: &Reporter) -> BridgeResult<()> {
    let process = reporter.scoped(["process"])?;
    process
        .gauge("start_time_seconds", "Start time of the process since unix epoch in seconds")?
        .set(now_millis() as f64 / 1000.0)?;
    process
        .info("build", "Bridge build information")?
        .set([("version", env!("CARGO_PKG_VERSION"))])?;
    Ok(())
}

/// Builds the push exporter for `config`.
///
/// Only metrics under the configured metric path are pushed, with that path
/// stripped from topics. Publish outcomes are counted under `diagnostics`.
///
/// # Errors
///
/// Returns an error if the metric path is invalid or the outcome counter
/// paths are taken by other kinds.
pub fn push_exporter<T: Transport>(
    config: &BridgeConfig,
    registry: Registry,
    transport: T,
    diagnostics: &Reporter,
) -> BridgeResult<PushExporter<T>> {
    Ok(PushExporter::new(registry, transport)
        .with_prefix(config.metric_root()?)
        .with_topic_prefix(config.push.topic_prefix.clone())
        .with_outcome_counters(diagnostics)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_metrics::{MetricKey, Path};

    #[test]
    fn process_metrics_are_registered() {
        let registry = Registry::new();
        register_process_metrics(&registry.reporter(Path::root())).unwrap();

        let start = registry
            .value(&MetricKey::unlabeled("process/start_time_seconds".parse().unwrap()))
            .and_then(|r| r.number())
            .unwrap();
        assert!(start > 1_600_000_000.0);
        assert!(registry
            .get(&MetricKey::unlabeled("process/build".parse().unwrap()))
            .is_some());
    }

    #[test]
    fn registering_twice_is_harmless() {
        let registry = Registry::new();
        let reporter = registry.reporter(Path::root());
        register_process_metrics(&reporter).unwrap();
        register_process_metrics(&reporter).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn push_exporter_only_publishes_device_metrics() {
        let registry = Registry::new();
        let root = registry.reporter(Path::root());
        register_process_metrics(&root).unwrap();
        let diagnostics = root.scoped(["bridge"]).unwrap();
        diagnostics.counter("malformed", "").unwrap().inc().unwrap();

        let config = BridgeConfig::from_toml(
            "metric_path = [\"home\"]\n[push]\ntopic_prefix = \"sensors\"\n",
        )
        .unwrap();
        registry
            .reporter(config.metric_root().unwrap())
            .gauge("kitchen/temp", "")
            .unwrap()
            .set(21.5)
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let exporter =
            push_exporter(&config, registry.clone(), LineTransport::new(Vec::new()), &diagnostics).unwrap();
        let first = exporter.publish_once().await;
        assert_eq!((first.readings, first.published), (1, 1));

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = exporter.publish_once().await;
        assert_eq!(second.published, 0);

        let written = String::from_utf8(exporter.into_transport().into_inner()).unwrap();
        assert_eq!(written, "sensors/kitchen\t{\"temp\":21.5}\n");
    }
}
