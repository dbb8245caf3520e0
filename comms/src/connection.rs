use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::{
    Channel, ChannelOptions, Codec, Frame, FramedChannel, Result, Transport, msg::Msg,
};

/// What a connection yields when asked for the next message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Msg(Msg),
    /// The peer ended the session gracefully.
    EndOfSession,
}

/// A framed channel paired with the codec negotiated for it.
pub struct Connection {
    channel: Box<dyn FramedChannel>,
    codec: Codec,
}

impl Connection {
    /// Wraps an opened channel, decoding with the codec it negotiated.
    pub fn new(channel: Box<dyn FramedChannel>) -> Self {
        let codec = Codec::new(channel.options().codec);
        Self { channel, codec }
    }

    /// Connects to `addr` through `transport` and proposes `options`.
    ///
    /// # Arguments
    /// * `transport` - The plain or secure transport.
    /// * `addr` - The peer's task endpoint.
    /// * `options` - Codec and compression for this connection.
    pub async fn dial(
        transport: &dyn Transport,
        addr: SocketAddr,
        options: ChannelOptions,
    ) -> Result<Self> {
        let stream = transport.connect(addr).await?;
        let channel = Channel::dial(stream, options).await?;
        Ok(Self::new(Box::new(channel)))
    }

    /// Completes the transport handshake and the option negotiation on an accepted stream.
    pub async fn accept(transport: &dyn Transport, stream: TcpStream) -> Result<Self> {
        let stream = transport.accept(stream).await?;
        let channel = Channel::accept(stream).await?;
        Ok(Self::new(Box::new(channel)))
    }

    pub fn options(&self) -> ChannelOptions {
        self.channel.options()
    }

    /// Serializes and sends `msg`.
    pub async fn send(&mut self, msg: &Msg) -> Result<()> {
        let buf = self.codec.serialize(msg)?;
        self.channel.send(&buf).await?;
        Ok(())
    }

    /// Waits for the next message.
    ///
    /// # Errors
    /// A `CommsErr::Codec` only discards the offending message, any other error
    /// means the connection is no longer usable.
    pub async fn recv(&mut self) -> Result<Incoming> {
        match self.channel.receive().await? {
            Frame::Message(buf) => Ok(Incoming::Msg(self.codec.deserialize(&buf)?)),
            Frame::EndOfSession => Ok(Incoming::EndOfSession),
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.channel.close().await?;
        Ok(())
    }
}
