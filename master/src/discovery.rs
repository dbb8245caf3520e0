//! The master side of the connectionless discovery protocol.

use std::sync::Arc;

use comms::{
    DiscoverySocket,
    msg::{Msg, SlaveCommand},
    specs::network::NetworkInfo,
};
use log::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::scheduler::Event;

/// Answers announcements with the task endpoint and forwards liveness
/// information to the scheduler until `shutdown` fires.
///
/// # Arguments
/// * `socket` - The discovery endpoint, shared with the probe sender.
/// * `endpoint` - Where announced slaves should open their task channel.
/// * `events` - The scheduler's inbox.
/// * `shutdown` - Stops the loop.
pub(crate) async fn serve(
    socket: Arc<DiscoverySocket>,
    endpoint: NetworkInfo,
    events: UnboundedSender<Event>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv_from() => received,
        };

        match received {
            Ok((Msg::Announce(info), from)) => {
                if info.network.kind != endpoint.kind {
                    warn!("{} speaks {}, ignoring its announcement", info.identity(), info.network.kind);
                    continue;
                }

                debug!("announcement from {} at {from}", info.identity());
                let identity = info.identity();
                if events.send(Event::Announced { identity, from }).is_err() {
                    return;
                }

                let socket = socket.clone();
                tokio::spawn(async move {
                    if let Err(e) = socket.send_to(&Msg::Connect(endpoint), from).await {
                        warn!("failed to answer the announcement from {from}: {e}");
                    }
                });
            }
            Ok((Msg::Slave(SlaveCommand::Pong), from)) => {
                if events.send(Event::Alive { from }).is_err() {
                    return;
                }
            }
            Ok((other, from)) => warn!("unexpected {} datagram from {from}", other.kind()),
            Err(e) => warn!("dropping datagram: {e}"),
        }
    }
}
