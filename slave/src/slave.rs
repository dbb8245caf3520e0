use std::{
    fmt, future,
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use comms::{
    ChannelOptions, Codec, Connection, DiscoverySocket, Transport,
    specs::network::{NetworkInfo, ServerInfo},
};
use log::{debug, error, info, warn};
use simulation::{ExecutorKind, ModelRegistry};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    Result, Session, SessionEnd, SlaveConfig,
    discovery::{self, Datagram},
};

const SESSION_GRACE: Duration = Duration::from_secs(5);

/// How a session's connection was established.
#[derive(Debug, Clone, Copy)]
enum Origin {
    Discovered(NetworkInfo),
    Direct(SocketAddr),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Discovered(endpoint) => write!(f, "discovered master {endpoint}"),
            Origin::Direct(addr) => write!(f, "master {addr}"),
        }
    }
}

/// What every session of this slave is built from.
struct Context {
    transport: Arc<dyn Transport>,
    models: Arc<ModelRegistry>,
    info: ServerInfo,
    executor: ExecutorKind,
    options: ChannelOptions,
}

impl Context {
    async fn dial(&self, endpoint: NetworkInfo, shutdown: CancellationToken) -> Result<SessionEnd> {
        let addr = endpoint.socket_addr();
        let mut conn = Connection::dial(self.transport.as_ref(), addr, self.options).await?;
        self.serve(&mut conn, &shutdown).await
    }

    async fn accept(&self, stream: TcpStream, shutdown: CancellationToken) -> Result<SessionEnd> {
        let mut conn = Connection::accept(self.transport.as_ref(), stream).await?;
        self.serve(&mut conn, &shutdown).await
    }

    async fn serve(&self, conn: &mut Connection, shutdown: &CancellationToken) -> Result<SessionEnd> {
        let mut session = Session::new(self.info.clone(), Arc::clone(&self.models), self.executor)?;
        session.run(conn, shutdown).await
    }
}

/// A slave process: announces itself, answers probes and serves the masters that connect.
pub struct Slave {
    config: SlaveConfig,
    transport: Arc<dyn Transport>,
    models: Arc<ModelRegistry>,
    discovery: DiscoverySocket,
    listener: Option<TcpListener>,
    info: ServerInfo,
}

impl Slave {
    /// Binds the slave's sockets.
    ///
    /// # Args
    /// * `config` - The slave's configuration.
    /// * `transport` - Plain or secure transport for task channels.
    /// * `models` - The models this slave can run.
    pub async fn bind(
        config: SlaveConfig,
        transport: Arc<dyn Transport>,
        models: ModelRegistry,
    ) -> Result<Self> {
        let addr = SocketAddr::new(config.host, config.discovery_port);
        let discovery = DiscoverySocket::bind(addr, Codec::new(config.codec)).await?;

        let listener = match config.listen_port {
            Some(port) => Some(TcpListener::bind((config.host, port)).await?),
            None => None,
        };

        let info = ServerInfo {
            name: config.name.clone(),
            network: NetworkInfo::new(discovery.local_addr()?, transport.kind()),
            models: models.kinds(),
            threads: config.executor.threads(),
        };

        Ok(Self {
            config,
            transport,
            models: Arc::new(models),
            discovery,
            listener,
            info,
        })
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// The address masters can dial directly, if listening.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Session faults are logged and never end the slave.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            config,
            transport,
            models,
            discovery: socket,
            listener,
            info,
        } = self;

        let master = config.master_discovery;
        let ctx = Arc::new(Context {
            transport,
            models,
            info,
            executor: config.executor,
            options: config.channel_options(),
        });

        let mut announce = time::interval(config.announce_interval());
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sessions = JoinSet::new();
        let mut attached = false;

        info!(slave = ctx.info.identity().as_str(); "slave running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = announce.tick(), if master.is_some() && !attached => {
                    if let Some(master) = master {
                        discovery::announce(&socket, &ctx.info, master).await;
                    }
                }
                res = socket.recv_from() => match res {
                    Ok((msg, from)) => match discovery::handle(&socket, msg, from).await {
                        Datagram::Connect(endpoint) if attached => {
                            debug!("already attached, ignoring endpoint {endpoint}");
                        }
                        Datagram::Connect(endpoint) if endpoint.kind != ctx.transport.kind() => {
                            warn!("master offered a {} endpoint, this slave speaks {}", endpoint.kind, ctx.transport.kind());
                        }
                        Datagram::Connect(endpoint) => {
                            info!("connecting to {endpoint}");
                            attached = true;
                            let ctx = Arc::clone(&ctx);
                            let stop = shutdown.clone();
                            sessions.spawn(async move {
                                (Origin::Discovered(endpoint), ctx.dial(endpoint, stop).await)
                            });
                        }
                        Datagram::Handled => {}
                    },
                    Err(e) => warn!("discovery: {e}"),
                },
                res = accept(listener.as_ref()) => match res {
                    Ok((stream, addr)) => {
                        info!("master connected from {addr}");
                        let ctx = Arc::clone(&ctx);
                        let stop = shutdown.clone();
                        sessions.spawn(async move { (Origin::Direct(addr), ctx.accept(stream, stop).await) });
                    }
                    Err(e) => warn!("failed to accept a master: {e}"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    match joined {
                        Ok((origin, res)) => {
                            if let Origin::Discovered(_) = origin {
                                attached = false;
                                announce.reset_immediately();
                            }

                            match res {
                                Ok(end) => info!("session with {origin} completed: {end:?}"),
                                Err(e) => error!("session with {origin} failed: {e}"),
                            }
                        }
                        Err(e) => error!("session task failed: {e}"),
                    }
                }
            }
        }

        info!("shutting down, closing {} sessions", sessions.len());
        let closing = time::timeout(SESSION_GRACE, async {
            while sessions.join_next().await.is_some() {}
        });
        if closing.await.is_err() {
            warn!("some sessions did not close in time, dropping them");
            sessions.shutdown().await;
        }
        Ok(())
    }
}

async fn accept(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => future::pending().await,
    }
}
