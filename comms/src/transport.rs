use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::{
    CommsErr, Result,
    specs::network::ChannelKind,
    tls::{TlsContext, TlsPaths},
};

/// Any stream a channel can be framed over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Establishes streams for the framed channel, either in the clear or encrypted.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Connects to `addr` and completes the transport handshake.
    async fn connect(&self, addr: SocketAddr) -> io::Result<BoxedStream>;

    /// Completes the transport handshake on an accepted stream.
    async fn accept(&self, stream: TcpStream) -> io::Result<BoxedStream>;
}

/// Raw tcp streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTransport;

#[async_trait]
impl Transport for PlainTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Plain
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn accept(&self, stream: TcpStream) -> io::Result<BoxedStream> {
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Mutually authenticated tls over tcp, both ends present a certificate
/// signed by the shared authority.
#[derive(Clone)]
pub struct SecureTransport {
    connector: TlsConnector,
    acceptor: TlsAcceptor,
    server_name: ServerName<'static>,
}

impl SecureTransport {
    /// Creates a new `SecureTransport`.
    ///
    /// # Arguments
    /// * `context` - The node's certificate material.
    /// * `server_name` - The name peers' certificates are verified against when connecting.
    pub fn new(context: &TlsContext, server_name: &str) -> Result<Self> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| CommsErr::Protocol(format!("invalid server name {server_name}: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(context.client_config()?),
            acceptor: TlsAcceptor::from(context.server_config()?),
            server_name,
        })
    }
}

#[async_trait]
impl Transport for SecureTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Secure
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let stream = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await?;
        Ok(Box::new(stream))
    }

    async fn accept(&self, stream: TcpStream) -> io::Result<BoxedStream> {
        stream.set_nodelay(true)?;
        let stream = self.acceptor.accept(stream).await?;
        Ok(Box::new(stream))
    }
}

/// Builds the transport a node's configuration asks for.
///
/// # Arguments
/// * `kind` - Plain or secure.
/// * `tls` - The PEM files, required for the secure kind.
/// * `server_name` - The name peer certificates are checked against.
///
/// # Errors
/// Fails if the secure kind is requested without usable certificate material.
pub fn build_transport(
    kind: ChannelKind,
    tls: Option<&TlsPaths>,
    server_name: &str,
) -> Result<Arc<dyn Transport>> {
    match (kind, tls) {
        (ChannelKind::Plain, _) => Ok(Arc::new(PlainTransport)),
        (ChannelKind::Secure, Some(paths)) => {
            let context = TlsContext::from_files(paths)?;
            Ok(Arc::new(SecureTransport::new(&context, server_name)?))
        }
        (ChannelKind::Secure, None) => Err(CommsErr::Protocol(
            "the secure channel needs tls certificate paths".into(),
        )),
    }
}
