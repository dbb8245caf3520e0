//! The implementation of the sending end of the application layer protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::proto;

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self { tx }
    }

    /// Sends `payload` as a single frame and flushes the inner writer.
    ///
    /// # Arguments
    /// * `payload` - The bytes to send.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let header = proto::header_for(payload.len())?;

        self.tx.write_all(&header).await?;
        if !payload.is_empty() {
            self.tx.write_all(payload).await?;
        }

        self.tx.flush().await
    }

    /// Writes the zero length frame that marks the end of the session.
    pub async fn send_end(&mut self) -> io::Result<()> {
        self.send(&[]).await
    }

    /// Shuts down the inner writer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
