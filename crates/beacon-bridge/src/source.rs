//! JSON-lines event source.
//!
//! Each input line is one decoded event,
//! `{"device": "...", "fields": {"name": value, ...}, "rssi": -70}`, with
//! `rssi` optional. Blank lines are
//! skipped; lines that fail to parse are counted and skipped.

use beacon_metrics::{Counter, DecodedEvent, Ingestor, Reporter};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::BridgeResult;

/// Totals for one run of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Events handed to the ingestor.
    pub events: u64,
    /// Lines that could not be parsed.
    pub malformed: u64,
}

/// Feeds JSON-lines events into an [`Ingestor`].
#[derive(Debug)]
pub struct LineSource {
    ingestor: Ingestor,
    malformed: Counter,
}

impl LineSource {
    /// Creates a source counting bad input in `malformed` under `diagnostics`.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter path is taken by another kind.
    pub fn new(ingestor: Ingestor, diagnostics: &Reporter) -> BridgeResult<Self> {
        let malformed = diagnostics.counter("malformed", "Input lines that were not valid events")?;
        Ok(Self {
            ingestor,
            malformed,
        })
    }

    /// Processes a single line.
    pub fn handle_line(&self, line: &str, stats: &mut SourceStats) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match DecodedEvent::from_json(line) {
            Ok(event) => {
                let outcome = self.ingestor.ingest(&event);
                stats.events += 1;
                debug!(device = %event.device, outcome = outcome.as_str(), "ingested event");
            }
            Err(e) => {
                stats.malformed += 1;
                let _ = self.malformed.inc();
                warn!(error = %e, "skipping malformed event line");
            }
        }
    }

    /// Reads lines until end of input or until `shutdown` turns true.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from `reader` fails.
    pub async fn run<R>(&self, reader: R, mut shutdown: watch::Receiver<bool>) -> BridgeResult<SourceStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut stats = SourceStats::default();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => self.handle_line(&line, &mut stats),
                        None => {
                            info!(events = stats.events, malformed = stats.malformed, "event source reached end of input");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("event source shutting down");
                        break;
                    }
                }
            }
        }

        Ok(stats)
    }
}
