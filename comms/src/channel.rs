use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::{CodecKind, Compression, Frame, OnoReceiver, OnoSender};

const PREAMBLE_MAGIC: u8 = b'S';
const PREAMBLE_VERSION: u8 = 1;

/// The per-connection options agreed on when a channel is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    pub codec: CodecKind,
    pub compression: Compression,
}

impl ChannelOptions {
    fn to_preamble(self) -> [u8; 5] {
        let [tag, level] = self.compression.to_bytes();
        [PREAMBLE_MAGIC, PREAMBLE_VERSION, self.codec.tag(), tag, level]
    }

    fn from_preamble(buf: &[u8]) -> io::Result<Self> {
        let &[magic, version, codec, tag, level] = buf else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("channel preamble has {} bytes, expected 5", buf.len()),
            ));
        };

        if magic != PREAMBLE_MAGIC || version != PREAMBLE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported channel preamble {magic:#04x} v{version}"),
            ));
        }

        Ok(Self {
            codec: CodecKind::from_tag(codec)?,
            compression: Compression::from_bytes(tag, level)?,
        })
    }
}

/// A bidirectional, length framed message transport.
///
/// Plain and encrypted channels share this contract, callers hold a
/// `Box<dyn FramedChannel>` and never need to know which one they got.
#[async_trait]
pub trait FramedChannel: Send {
    /// Sends one message and flushes it.
    ///
    /// # Errors
    /// Empty payloads are rejected, the zero length frame is reserved for ending the session.
    async fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Waits for the next message or the end of the session.
    async fn receive(&mut self) -> io::Result<Frame>;

    /// Ends the session and releases the transport. Calling it again does nothing.
    async fn close(&mut self) -> io::Result<()>;

    /// The options negotiated for this connection.
    fn options(&self) -> ChannelOptions;
}

type Halves<S> = (OnoReceiver<ReadHalf<S>>, OnoSender<WriteHalf<S>>);

/// A framed channel over any byte stream.
pub struct Channel<S: AsyncRead + AsyncWrite + Unpin> {
    halves: Option<Halves<S>>,
    options: ChannelOptions,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Opens the channel from the connecting side, proposing `options` to the peer.
    ///
    /// # Arguments
    /// * `stream` - An established stream.
    /// * `options` - The codec and compression this connection will use.
    pub async fn dial(stream: S, options: ChannelOptions) -> io::Result<Self> {
        let (rx, tx) = tokio::io::split(stream);
        let (rx, mut tx) = crate::channel(rx, tx);

        tx.send(&options.to_preamble()).await?;

        Ok(Self {
            halves: Some((rx, tx)),
            options,
        })
    }

    /// Opens the channel from the accepting side, adopting the options the peer proposes.
    ///
    /// # Arguments
    /// * `stream` - An established stream.
    pub async fn accept(stream: S) -> io::Result<Self> {
        let (rx, tx) = tokio::io::split(stream);
        let (mut rx, tx) = crate::channel(rx, tx);

        let options = match rx.recv().await? {
            Frame::Message(buf) => ChannelOptions::from_preamble(&buf)?,
            Frame::EndOfSession => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer left before negotiating the channel",
                ));
            }
        };

        Ok(Self {
            halves: Some((rx, tx)),
            options,
        })
    }

    fn halves(&mut self) -> io::Result<&mut Halves<S>> {
        self.halves
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel is closed"))
    }
}

#[async_trait]
impl<S> FramedChannel for Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty payloads are reserved for the end of session marker",
            ));
        }

        let payload = self.options.compression.compress(payload)?;
        let (_, tx) = self.halves()?;
        tx.send(&payload).await
    }

    async fn receive(&mut self) -> io::Result<Frame> {
        let compression = self.options.compression;
        let (rx, _) = self.halves()?;

        match rx.recv().await? {
            Frame::Message(buf) => Ok(Frame::Message(compression.decompress(buf)?)),
            Frame::EndOfSession => Ok(Frame::EndOfSession),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        let Some((rx, mut tx)) = self.halves.take() else {
            return Ok(());
        };

        let res = match tx.send_end().await {
            Ok(()) => tx.shutdown().await,
            Err(e) => Err(e),
        };

        drop(rx);

        match res {
            // the peer may have left first
            Err(e) if is_disconnect(&e) => Ok(()),
            other => other,
        }
    }

    fn options(&self) -> ChannelOptions {
        self.options
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
