//! OpenMetrics text rendering for scrape endpoints.
//!
//! Readings are rendered in the order given, which for a registry
//! collection is sorted by key. A `# TYPE` line (and `# HELP` when the
//! description is non-empty) is written once whenever the metric family
//! changes. Distinct paths that sanitize to the same family name are not
//! merged: the first in order is rendered and later ones are skipped with a
//! warning.

use std::collections::HashMap;
use std::fmt::Write;

use tracing::warn;

use crate::histogram::{HistogramSnapshot, Summary};
use crate::reading::{Reading, ReadingValue};
use crate::registry::Registry;
use crate::types::{MetricKind, Path};

/// Content type of the rendered text.
pub const CONTENT_TYPE: &str = "text/plain; version=openmetrics";

/// Renders a full snapshot of `registry`.
#[must_use]
pub fn render_registry(registry: &Registry) -> String {
    render(&registry.collect_all())
}

/// Renders readings as OpenMetrics text, terminated by `# EOF`.
#[must_use]
pub fn render(readings: &[Reading]) -> String {
    let mut output = String::new();
    let mut current_family: Option<(String, MetricKind)> = None;
    let mut owners: HashMap<String, (&Path, MetricKind)> = HashMap::new();

    for reading in readings {
        let name = metric_name(&reading.path);
        let owner = owners
            .entry(family_name(&name, reading.kind))
            .or_insert((&reading.path, reading.kind));
        if *owner != (&reading.path, reading.kind) {
            warn!(
                path = %reading.path,
                kind = %reading.kind,
                taken_by = %owner.0,
                name = %name,
                "skipping metric whose exposition name is already taken"
            );
            continue;
        }

        let family = (name, reading.kind);

        if current_family.as_ref() != Some(&family) {
            let (name, kind) = &family;
            let _ = writeln!(output, "# TYPE {} {}", family_name(name, *kind), type_name(*kind));
            if !reading.description.is_empty() {
                let _ = writeln!(
                    output,
                    "# HELP {} {}",
                    family_name(name, *kind),
                    escape_help(&reading.description)
                );
            }
            current_family = Some(family);
        }

        if let Some((name, _)) = &current_family {
            write_samples(&mut output, name, reading);
        }
    }

    output.push_str("# EOF\n");
    output
}

fn type_name(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "counter",
        MetricKind::Gauge | MetricKind::Histogram => "gauge",
        MetricKind::State => "stateset",
        MetricKind::Info => "info",
    }
}

fn family_name(name: &str, kind: MetricKind) -> String {
    match kind {
        MetricKind::Counter => name.strip_suffix("_total").unwrap_or(name).to_string(),
        MetricKind::Info => name.strip_suffix("_info").unwrap_or(name).to_string(),
        _ => name.to_string(),
    }
}

fn sample_name(name: &str, kind: MetricKind) -> String {
    match kind {
        MetricKind::Counter => format!("{}_total", family_name(name, kind)),
        MetricKind::Info => format!("{}_info", family_name(name, kind)),
        _ => name.to_string(),
    }
}

fn write_samples(output: &mut String, name: &str, reading: &Reading) {
    let sample = sample_name(name, reading.kind);
    let labels: Vec<(String, String)> = reading
        .labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    match &reading.value {
        ReadingValue::Number(value) => {
            write_line(output, &sample, &labels, *value, reading.timestamp);
        }
        ReadingValue::State { current, states } => {
            for state in states {
                let mut labels = labels.clone();
                labels.push(("state".to_string(), state.clone()));
                let value = if current.as_ref() == Some(state) { 1.0 } else { 0.0 };
                write_line(output, &sample, &labels, value, reading.timestamp);
            }
        }
        ReadingValue::Info(fields) => {
            let mut labels = labels;
            labels.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            write_line(output, &sample, &labels, 1.0, reading.timestamp);
        }
        ReadingValue::Histogram(snapshot) => {
            write_histogram(output, &sample, &labels, snapshot, reading.timestamp);
        }
    }
}

fn write_histogram(
    output: &mut String,
    name: &str,
    labels: &[(String, String)],
    snapshot: &HistogramSnapshot,
    timestamp: Option<i64>,
) {
    let with = |key: &str, value: String| {
        let mut labels = labels.to_vec();
        labels.push((key.to_string(), value));
        labels
    };

    write_line(output, name, &with("stat", "count".into()), snapshot.count as f64, timestamp);
    if let (Some(min), Some(max)) = (snapshot.min, snapshot.max) {
        write_line(output, name, &with("stat", "min".into()), min, timestamp);
        write_line(output, name, &with("stat", "max".into()), max, timestamp);
    }

    match &snapshot.summary {
        Summary::Quantiles(quantiles) => {
            for (stat, value) in quantiles {
                write_line(output, name, &with("stat", (*stat).to_string()), *value, timestamp);
            }
        }
        Summary::Buckets(buckets) => {
            for bucket in buckets {
                let le = bucket.upper.map_or_else(|| "+Inf".to_string(), format_value);
                write_line(output, name, &with("le", le), bucket.fraction, timestamp);
            }
        }
    }
}

fn write_line(
    output: &mut String,
    name: &str,
    labels: &[(String, String)],
    value: f64,
    timestamp: Option<i64>,
) {
    output.push_str(name);
    if !labels.is_empty() {
        output.push('{');
        for (i, (key, value)) in labels.iter().enumerate() {
            if i > 0 {
                output.push(',');
            }
            let _ = write!(output, "{}=\"{}\"", sanitize(key), escape_label_value(value));
        }
        output.push('}');
    }
    let _ = write!(output, " {}", format_value(value));
    if let Some(millis) = timestamp {
        let _ = write!(output, " {}", (millis + 500).div_euclid(1000));
    }
    output.push('\n');
}

/// The exposition name for a path: segments joined with `_`.
#[must_use]
pub fn metric_name(path: &Path) -> String {
    sanitize(&path.join("_"))
}

fn sanitize(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
