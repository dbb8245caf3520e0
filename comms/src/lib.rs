mod channel;
mod codec;
mod compression;
mod connection;
mod discovery;
mod error;
pub mod msg;
mod proto;
mod receiver;
mod sender;
pub mod specs;
pub mod tls;
mod transport;

use tokio::io::{AsyncRead, AsyncWrite};

pub use channel::{Channel, ChannelOptions, FramedChannel};
pub use codec::{Codec, CodecError, CodecKind};
pub use compression::Compression;
pub use connection::{Connection, Incoming};
pub use discovery::DiscoverySocket;
pub use error::{CommsErr, Result};
pub use proto::{deframe, frame};
pub use receiver::{Frame, OnoReceiver};
pub use sender::OnoSender;
pub use transport::{
    AsyncStream, BoxedStream, PlainTransport, SecureTransport, Transport, build_transport,
};

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest payload a single frame may carry.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Creates both `OnoReceiver` and `OnoSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of an ono receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
