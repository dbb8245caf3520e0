use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::{Codec, CommsErr, Result, msg::Msg, proto};

const MAX_DATAGRAM: usize = 64 * 1024;

/// The connectionless endpoint used for announcements, endpoint hand out and liveness probes.
///
/// Every datagram carries exactly one frame. Methods take `&self` so one socket
/// can be shared by a receive loop and any number of senders.
pub struct DiscoverySocket {
    socket: UdpSocket,
    codec: Codec,
}

impl DiscoverySocket {
    /// Binds a new `DiscoverySocket`.
    ///
    /// # Arguments
    /// * `addr` - The local address to bind.
    /// * `codec` - The codec every node of the deployment is configured with.
    pub async fn bind(addr: SocketAddr, codec: Codec) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, codec })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends `msg` to `addr` as a single datagram.
    pub async fn send_to(&self, msg: &Msg, addr: SocketAddr) -> Result<()> {
        let payload = self.codec.serialize(msg)?;
        let datagram = proto::frame(&payload)?;
        self.socket.send_to(&datagram, addr).await?;
        Ok(())
    }

    /// Waits for the next datagram.
    ///
    /// # Errors
    /// A malformed datagram yields `CommsErr::Protocol` naming its sender, the socket
    /// stays usable.
    pub async fn recv_from(&self) -> Result<(Msg, SocketAddr)> {
        let mut buf = vec![0; MAX_DATAGRAM];
        let (n, from) = self.socket.recv_from(&mut buf).await?;

        let msg = proto::deframe(&buf[..n])
            .map_err(|e| CommsErr::Protocol(format!("malformed datagram from {from}: {e}")))
            .and_then(|payload| {
                self.codec.deserialize(payload).map_err(|e| {
                    CommsErr::Protocol(format!("undecodable datagram from {from}: {e}"))
                })
            })?;

        Ok((msg, from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodecKind, msg::MasterCommand};

    #[tokio::test]
    async fn datagrams_carry_one_framed_message() {
        let codec = Codec::new(CodecKind::Bincode);
        let a = DiscoverySocket::bind("127.0.0.1:0".parse().unwrap(), codec)
            .await
            .unwrap();
        let b = DiscoverySocket::bind("127.0.0.1:0".parse().unwrap(), codec)
            .await
            .unwrap();

        let ping = Msg::Master(MasterCommand::Ping);
        a.send_to(&ping, b.local_addr().unwrap()).await.unwrap();

        let (msg, from) = b.recv_from().await.unwrap();
        assert_eq!(msg, ping);
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn garbage_datagrams_are_reported_and_skipped() {
        let codec = Codec::default();
        let sock = DiscoverySocket::bind("127.0.0.1:0".parse().unwrap(), codec)
            .await
            .unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let to = sock.local_addr().unwrap();

        raw.send_to(&[0, 0, 0, 9, 1], to).await.unwrap();
        sock.send_to(&Msg::Err("after".into()), to).await.unwrap();

        assert!(matches!(sock.recv_from().await, Err(CommsErr::Protocol(_))));
        assert_eq!(sock.recv_from().await.unwrap().0, Msg::Err("after".into()));
    }
}
