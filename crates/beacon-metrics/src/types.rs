//! Core identity types for the metrics engine.
//!
//! This module provides the fundamental types used throughout the crate:
//! - [`Path`]: An ordered, hierarchical metric name
//! - [`LabelSet`]: A canonically sorted set of label pairs
//! - [`MetricKey`]: The registry's primary key, `(Path, LabelSet)`
//! - [`MetricKind`]: The tag of a metric variant

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// Returns the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An ordered sequence of name segments identifying a metric.
///
/// Segments are non-empty and never contain `/`, which is reserved as the
/// display separator. Paths are immutable: scoping returns a new path.
/// Ordering is lexicographic by segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<String>);

impl Path {
    /// The empty path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Creates a path from its segments.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidPath` if any segment is empty or
    /// contains `/`.
    pub fn new<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::root().scoped(parts)
    }

    /// Returns a new path with `parts` appended.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidPath` if any segment is empty or
    /// contains `/`.
    pub fn scoped<I, S>(&self, parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut segments = self.0.clone();
        for part in parts {
            let part = part.into();
            validate_segment(&part)?;
            segments.push(part);
        }
        Ok(Self(segments))
    }

    /// Returns the segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the last segment, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns all but the last segment.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.0.split_last() {
            Some((_, rest)) => Self(rest.to_vec()),
            None => Self::root(),
        }
    }

    /// Checks whether `prefix` is a segment-wise prefix of this path.
    ///
    /// The root path is a prefix of every path.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns this path with `prefix` removed.
    ///
    /// If `prefix` does not match, the path is returned unchanged.
    #[must_use]
    pub fn stripped(&self, prefix: &Self) -> Self {
        if self.starts_with(prefix) {
            Self(self.0[prefix.len()..].to_vec())
        } else {
            self.clone()
        }
    }

    /// Joins the segments with `separator`.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(MetricsError::InvalidPath {
            reason: "path segments cannot be empty".to_string(),
        });
    }
    if segment.contains('/') {
        return Err(MetricsError::InvalidPath {
            reason: format!("path segment '{segment}' cannot contain '/'"),
        });
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join("/"))
    }
}

impl FromStr for Path {
    type Err = MetricsError;

    /// Parses a `/`-separated path. Empty input yields the root path.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        Self::new(s.split('/'))
    }
}

/// A set of label pairs with unique keys, stored sorted by key.
///
/// Two label sets with the same pairs are equal and render identically
/// regardless of the order the labels were applied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    /// The empty label set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Builds a label set from pairs. Later duplicates of a key win.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` if any key is empty.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::empty();
        for (key, value) in pairs {
            set = set.labeled(key, value)?.into_owned();
        }
        Ok(set)
    }

    /// Returns the set with `key` upserted to `value`.
    ///
    /// If the pair is already present the original set is returned borrowed,
    /// so callers can detect the no-op.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidArgument` if `key` is empty.
    pub fn labeled(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Cow<'_, Self>> {
        let key = key.into();
        let value = value.into();

        if key.is_empty() {
            return Err(MetricsError::invalid_argument("label keys cannot be empty"));
        }

        match self.0.binary_search_by(|(k, _)| k.as_str().cmp(&key)) {
            Ok(pos) if self.0[pos].1 == value => Ok(Cow::Borrowed(self)),
            Ok(pos) => {
                let mut pairs = self.0.clone();
                pairs[pos].1 = value;
                Ok(Cow::Owned(Self(pairs)))
            }
            Err(pos) => {
                let mut pairs = self.0.clone();
                pairs.insert(pos, (key, value));
                Ok(Cow::Owned(Self(pairs)))
            }
        }
    }

    /// Returns the value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|pos| self.0[pos].1.as_str())
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}=\"{v}\"")?;
        }
        f.write_str("}")
    }
}

/// The registry's primary key.
///
/// Keys order by path first, then by label set, which gives collection its
/// deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    /// Position in the naming hierarchy.
    pub path: Path,
    /// Variant identity within the path.
    pub labels: LabelSet,
}

impl MetricKey {
    /// Creates a key from a path and label set.
    #[must_use]
    pub const fn new(path: Path, labels: LabelSet) -> Self {
        Self { path, labels }
    }

    /// Creates an unlabeled key.
    #[must_use]
    pub const fn unlabeled(path: Path) -> Self {
        Self::new(path, LabelSet::empty())
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, self.labels)
    }
}

/// The kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic non-negative accumulator.
    Counter,
    /// Arbitrary numeric value.
    Gauge,
    /// A string drawn from a (possibly open) set of states.
    State,
    /// Windowed sample distribution.
    Histogram,
    /// Static string fields.
    Info,
}

impl MetricKind {
    /// Returns the lowercase name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::State => "state",
            Self::Histogram => "histogram",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
