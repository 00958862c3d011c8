//! Line-oriented push transport.
//!
//! Writes each payload as `topic<TAB>payload<LF>` to an async writer, so the
//! bridge's stdout can be piped into any broker client.

use beacon_metrics::export::{Transport, TransportError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// A [`Transport`] that writes one line per publish.
#[derive(Debug)]
pub struct LineTransport<W> {
    writer: Mutex<W>,
}

impl<W> LineTransport<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineTransport<tokio::io::Stdout> {
    /// A transport writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> Transport for LineTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if topic.contains(['\t', '\n']) {
            return Err(TransportError::Rejected {
                reason: format!("topic {topic:?} contains a tab or newline"),
            });
        }

        let mut line = Vec::with_capacity(topic.len() + payload.len() + 2);
        line.extend_from_slice(topic.as_bytes());
        line.push(b'\t');
        line.extend_from_slice(&payload);
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
