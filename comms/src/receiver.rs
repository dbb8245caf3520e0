use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{LEN_TYPE_SIZE, proto};

/// The outcome of reading one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Vec<u8>),
    /// The peer sent a zero length frame or closed the stream between frames.
    EndOfSession,
}

/// The receiving end handle of the communication.
///
/// Bytes of a partially read frame live in the receiver, so a `recv` future
/// can be dropped and the next call resumes the same frame.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    header: [u8; LEN_TYPE_SIZE],
    filled: usize,
    payload: Option<(Vec<u8>, usize)>,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    /// Creates a new `OnoReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            header: [0; LEN_TYPE_SIZE],
            filled: 0,
            payload: None,
        }
    }

    /// Waits to receive a new frame from the inner receiver.
    ///
    /// Cancel safe: dropping the future before it completes loses no bytes.
    ///
    /// # Returns
    /// The frame's payload, `Frame::EndOfSession` if the peer finished the session
    /// or an io error if the stream broke in the middle of a frame.
    pub async fn recv(&mut self) -> io::Result<Frame> {
        if self.payload.is_none() {
            match self.read_header().await? {
                0 => return Ok(Frame::EndOfSession),
                len => self.payload = Some((vec![0; len], 0)),
            }
        }

        if let Some((payload, read)) = self.payload.as_mut() {
            while *read < payload.len() {
                let n = self.rx.read(&mut payload[*read..]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream ended after {read} of {} payload bytes", payload.len()),
                    ));
                }
                *read += n;
            }
        }

        let payload = self.payload.take().map(|(buf, _)| buf).unwrap_or_default();
        Ok(Frame::Message(payload))
    }

    /// Reads the length header, zero meaning the session ended.
    async fn read_header(&mut self) -> io::Result<usize> {
        while self.filled < LEN_TYPE_SIZE {
            let n = match self.rx.read(&mut self.header[self.filled..]).await {
                Ok(n) => n,
                // tls streams report a missing close notify this way
                Err(e) if self.filled == 0 && e.kind() == io::ErrorKind::UnexpectedEof => 0,
                Err(e) => return Err(e),
            };

            if n == 0 {
                if self.filled == 0 {
                    return Ok(0);
                }

                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} bytes of a frame header", self.filled),
                ));
            }

            self.filled += n;
        }

        self.filled = 0;
        proto::payload_len(self.header)
    }
}
