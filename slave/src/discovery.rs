//! The slave side of the connectionless discovery protocol.

use std::net::SocketAddr;

use comms::{
    DiscoverySocket,
    msg::{MasterCommand, Msg, SlaveCommand},
    specs::network::{NetworkInfo, ServerInfo},
};
use log::{debug, warn};

/// What a received datagram asks of the slave runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Datagram {
    /// A master handed out its task endpoint.
    Connect(NetworkInfo),
    Handled,
}

/// Sends this slave's announcement to the master's discovery endpoint.
pub(crate) async fn announce(socket: &DiscoverySocket, info: &ServerInfo, master: SocketAddr) {
    debug!("announcing to {master}");

    if let Err(e) = socket.send_to(&Msg::Announce(info.clone()), master).await {
        warn!("failed to announce to {master}: {e}");
    }
}

/// Answers liveness probes and extracts task endpoints.
pub(crate) async fn handle(socket: &DiscoverySocket, msg: Msg, from: SocketAddr) -> Datagram {
    match msg {
        Msg::Master(MasterCommand::Ping) => {
            if let Err(e) = socket.send_to(&Msg::Slave(SlaveCommand::Pong), from).await {
                warn!("failed to answer the probe from {from}: {e}");
            }
            Datagram::Handled
        }
        Msg::Connect(endpoint) => Datagram::Connect(endpoint),
        other => {
            warn!("unexpected {} datagram from {from}", other.kind());
            Datagram::Handled
        }
    }
}
