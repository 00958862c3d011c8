//! Integration tests for registry identity, aggregation, windowing and
//! incremental collection.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use beacon_metrics::{
    CollectFilter, HistogramConfig, LabelSet, MetricKey, MetricKind, MetricOptions, MetricsError,
    Path, ReadingValue, Registry, export, now_millis,
};
use proptest::prelude::*;

fn path(s: &str) -> Path {
    s.parse().unwrap()
}

#[test]
fn find_or_create_returns_identical_instance() {
    let registry = Registry::new();
    let key = MetricKey::new(path("svc/requests"), LabelSet::from_pairs([("code", "200")]).unwrap());

    let first = registry
        .find_or_create(key.clone(), "requests", MetricOptions::Counter)
        .unwrap();
    let second = registry
        .find_or_create(key.clone(), "requests", MetricOptions::Counter)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let err = registry
        .find_or_create(key, "requests", MetricOptions::Gauge)
        .unwrap_err();
    assert!(matches!(err, MetricsError::IdentityConflict { .. }));
}

#[test]
fn concurrent_creation_yields_one_metric() {
    let registry = Registry::new();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let counter = registry
                    .reporter(Path::root())
                    .counter("shared/hits", "")
                    .unwrap();
                for _ in 0..100 {
                    counter.inc().unwrap();
                }
                Arc::clone(counter.metric().unwrap())
            })
        })
        .collect();

    let metrics: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(metrics.iter().all(|m| Arc::ptr_eq(m, &metrics[0])));
    assert_eq!(registry.len(), 1);

    let reading = registry
        .value(&MetricKey::unlabeled(path("shared/hits")))
        .unwrap();
    assert_eq!(reading.value, ReadingValue::Number(800.0));
}

#[test]
fn label_order_does_not_affect_identity_or_output() {
    let registry = Registry::new();
    let gauge = registry.reporter(Path::root()).gauge("room/temp", "").unwrap();

    let a = gauge.labeled("floor", "2").unwrap().labeled("side", "east").unwrap();
    let b = gauge.labeled("side", "east").unwrap().labeled("floor", "2").unwrap();

    assert_eq!(a.key(), b.key());
    assert_eq!(a.key().to_string(), b.key().to_string());
    assert!(Arc::ptr_eq(a.metric().unwrap(), b.metric().unwrap()));

    let unordered = Registry::new();
    unordered
        .reporter(Path::root())
        .gauge("room/temp", "")
        .unwrap()
        .labeled("side", "east")
        .unwrap()
        .labeled("floor", "2")
        .unwrap()
        .set_at(1.0, 1_000)
        .unwrap();
    let ordered = Registry::new();
    ordered
        .reporter(Path::root())
        .gauge("room/temp", "")
        .unwrap()
        .labeled("floor", "2")
        .unwrap()
        .labeled("side", "east")
        .unwrap()
        .set_at(1.0, 1_000)
        .unwrap();
    assert_eq!(export::render_registry(&unordered), export::render_registry(&ordered));
    assert_eq!(ordered.len(), 2);
}

#[test]
fn labeled_counters_emit_children_and_total() {
    let registry = Registry::new();
    let c = registry.reporter(Path::root()).counter("c", "").unwrap();
    c.labeled("x", "1").unwrap().inc_by(1.0).unwrap();
    c.labeled("x", "2").unwrap().inc_by(2.0).unwrap();

    let readings = registry.collect_all();
    assert_eq!(readings.len(), 3);

    assert!(readings[0].labels.is_empty());
    assert_eq!(readings[0].kind, MetricKind::Counter);
    assert_eq!(readings[0].value, ReadingValue::Number(3.0));
    assert_eq!(readings[1].labels.get("x"), Some("1"));
    assert_eq!(readings[1].value, ReadingValue::Number(1.0));
    assert_eq!(readings[2].labels.get("x"), Some("2"));
    assert_eq!(readings[2].value, ReadingValue::Number(2.0));

    assert_eq!(readings[0].timestamp, readings[1].timestamp.max(readings[2].timestamp));
}

#[test]
fn state_restriction_is_enforced() {
    let registry = Registry::new();
    let reporter = registry.reporter(Path::root());

    let restricted = reporter.state("restricted", "", ["a", "b"]).unwrap();
    assert!(restricted.set("a").is_ok());
    assert!(restricted.set("b").is_ok());
    assert!(matches!(
        restricted.set("c"),
        Err(MetricsError::InvalidArgument { .. })
    ));

    let open = reporter.state("open", "", Vec::<String>::new()).unwrap();
    open.set("anything").unwrap();
    assert!(open.known_states().contains(&"anything".to_string()));
}

#[test]
fn histogram_window_includes_and_excludes_samples() {
    let registry = Registry::new();
    let histogram = registry
        .reporter(Path::root())
        .histogram("latency", "", HistogramConfig::quantiles())
        .unwrap();

    let t0 = now_millis() - 5_000;
    for i in 0..1000 {
        histogram.record_at(f64::from(i), t0 + i64::from(i)).unwrap();
    }

    let sampler = histogram.metric().unwrap().sampler().unwrap();
    assert_eq!(sampler.read_window(Duration::from_secs(60)).count, 1000);

    let empty = sampler.read_window(Duration::ZERO);
    assert_eq!(empty.count, 0);
    assert!(empty.min.is_none());
}

#[test]
fn incremental_collection_respects_since() {
    let registry = Registry::new();
    let reporter = registry.reporter(Path::root());
    let stale = reporter.gauge("stale", "").unwrap();
    let fresh = reporter.gauge("fresh", "").unwrap();

    let t1 = 10_000;
    stale.set_at(1.0, t1 - 1).unwrap();
    fresh.set_at(2.0, t1 + 1).unwrap();

    let readings = registry.collect(&CollectFilter::all().since(t1));
    let paths: Vec<String> = readings.iter().map(|r| r.path.to_string()).collect();
    assert_eq!(paths, ["fresh"]);
}

#[test]
fn repeated_collection_renders_identically() {
    let registry = Registry::new();
    let reporter = registry.reporter(path("home"));
    reporter.gauge("kitchen/temp", "Kitchen temperature").unwrap().set(21.0).unwrap();
    reporter.state("kitchen/mode", "", ["eco", "boost"]).unwrap().set("eco").unwrap();
    let beacons = reporter.counter("beacons", "").unwrap();
    beacons.labeled("action", "handled").unwrap().inc().unwrap();

    let first = export::render_registry(&registry);
    let second = export::render_registry(&registry);
    assert_eq!(first, second);
}

proptest! {
    #[test]
    fn collection_order_is_independent_of_insertion_order(
        names in proptest::collection::btree_set("[a-z]{1,6}", 1..12),
        seed in any::<u64>(),
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let mut shuffled = names.clone();
        let len = shuffled.len();
        for i in 0..len {
            let j = (seed as usize).wrapping_add(i * 7) % len;
            shuffled.swap(i, j);
        }

        let a = Registry::new();
        let b = Registry::new();
        for name in &names {
            a.reporter(Path::root()).gauge(name, "").unwrap().set_at(1.0, 1_000).unwrap();
        }
        for name in &shuffled {
            b.reporter(Path::root()).gauge(name, "").unwrap().set_at(1.0, 1_000).unwrap();
        }

        prop_assert_eq!(export::render_registry(&a), export::render_registry(&b));
    }
}
