//! Error types for the bridge.

use std::net::SocketAddr;

use beacon_metrics::MetricsError;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while starting or running the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration file could not be read, parsed or validated.
    #[error("config error: {0}")]
    Config(String),

    /// Failed to bind the scrape server.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// The scrape server stopped with an error.
    #[error("server error: {0}")]
    Server(String),

    /// Metric setup failed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = BridgeError::Config("push.interval_secs must be greater than 0".to_string());
        assert_eq!(
            err.to_string(),
            "config error: push.interval_secs must be greater than 0"
        );
    }

    #[test]
    fn metrics_error_is_transparent() {
        let err = BridgeError::from(MetricsError::InvalidPath {
            reason: "empty".to_string(),
        });
        assert_eq!(err.to_string(), "invalid path: empty");
    }

    #[test]
    fn bind_error_names_address() {
        let addr: SocketAddr = "127.0.0.1:8088".parse().unwrap();
        let err = BridgeError::BindFailed(
            addr,
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(err.to_string().contains("127.0.0.1:8088"));
    }
}
