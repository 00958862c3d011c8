//! Error types for the beacon-metrics crate.

use thiserror::Error;

use crate::types::MetricKind;

/// Errors that can occur in the metrics engine.
///
/// All of these are local validation failures, returned synchronously to the
/// producer that triggered them. The engine never retries.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric already exists at this key with a different kind.
    #[error("identity conflict at {key}: registered as {existing}, requested as {requested}")]
    IdentityConflict {
        /// The rendered metric key.
        key: String,
        /// The kind already registered.
        existing: MetricKind,
        /// The kind that was requested.
        requested: MetricKind,
    },

    /// An argument was rejected at the call site.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Why the argument was rejected.
        reason: String,
    },

    /// A gauge was driven both directly and by a value function.
    #[error("conflicting value source for {key}: direct writes and a value function are exclusive")]
    ConflictingValueSource {
        /// The rendered metric key.
        key: String,
    },

    /// A counter with labeled children was written directly.
    #[error("cannot write to aggregation root {key}: it has labeled children")]
    AggregateWriteError {
        /// The rendered metric key.
        key: String,
    },

    /// A path or label could not be built.
    #[error("invalid path: {reason}")]
    InvalidPath {
        /// Why the path is invalid.
        reason: String,
    },
}

impl MetricsError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Result type for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
