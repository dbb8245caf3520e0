use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use comms::{
    ChannelOptions, Codec, Connection, DiscoverySocket, Transport,
    specs::{
        model::ModelSpec,
        network::{NetworkInfo, ServerInfo},
    },
};
use log::{info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{
        mpsc::{self, UnboundedSender},
        oneshot, watch,
    },
    task::{JoinHandle, JoinSet},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::MasterConfig,
    discovery,
    error::{MasterErr, Result},
    job::{JobRequest, RunOutcome},
    link::{self, Link},
    scheduler::{Event, Scheduler, SchedulerConfig},
    state::MasterState,
};

/// Turns accepted or dialed connections into registered slaves.
struct Admission {
    transport: Arc<dyn Transport>,
    options: ChannelOptions,
    events: UnboundedSender<Event>,
    ids: AtomicU64,
    handshake_timeout: Duration,
}

impl Admission {
    async fn accept(&self, stream: TcpStream) -> Result<ServerInfo> {
        let conn = time::timeout(
            self.handshake_timeout,
            Connection::accept(self.transport.as_ref(), stream),
        )
        .await
        .map_err(|_| comms::CommsErr::Protocol("handshake timed out".into()))??;

        self.admit(conn).await
    }

    async fn dial(&self, addr: SocketAddr) -> Result<ServerInfo> {
        let conn = time::timeout(
            self.handshake_timeout,
            Connection::dial(self.transport.as_ref(), addr, self.options),
        )
        .await
        .map_err(|_| comms::CommsErr::Protocol("handshake timed out".into()))??;

        self.admit(conn).await
    }

    async fn admit(&self, mut conn: Connection) -> Result<ServerInfo> {
        let info = link::handshake(&mut conn, self.handshake_timeout).await?;
        let slave = self.ids.fetch_add(1, Ordering::Relaxed);
        let link = Link::spawn(slave, conn, self.events.clone());

        self.events
            .send(Event::Joined {
                slave,
                info: info.clone(),
                link,
            })
            .map_err(|_| MasterErr::SchedulerGone)?;

        Ok(info)
    }
}

/// A running master: its discovery endpoint, its task endpoint and the
/// scheduler dispatching runs to the slaves that joined.
pub struct Master {
    admission: Arc<Admission>,
    state: watch::Receiver<MasterState>,
    discovery_addr: SocketAddr,
    endpoint: NetworkInfo,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    scheduler: JoinHandle<()>,
}

impl Master {
    /// Binds the discovery and task endpoints and starts serving slaves.
    ///
    /// # Arguments
    /// * `config` - The master configuration.
    /// * `transport` - The plain or secure transport task channels use.
    ///
    /// # Errors
    /// Fails if either endpoint cannot be bound.
    pub async fn start(config: MasterConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let options = config.channel_options();
        let socket = DiscoverySocket::bind(
            SocketAddr::new(config.host, config.discovery_port),
            Codec::new(options.codec),
        )
        .await?;
        let socket = Arc::new(socket);
        let discovery_addr = socket.local_addr()?;

        let listener = TcpListener::bind(SocketAddr::new(config.host, config.task_port)).await?;
        let endpoint = NetworkInfo::new(listener.local_addr()?, transport.kind());

        let (events, inbox) = mpsc::unbounded_channel();
        let (publisher, state) = watch::channel(MasterState::default());
        let scheduler = Scheduler::new(
            SchedulerConfig::from(&config),
            inbox,
            socket.clone(),
            publisher,
        );

        let admission = Arc::new(Admission {
            transport,
            options,
            events: events.clone(),
            ids: AtomicU64::new(0),
            handshake_timeout: config.handshake_timeout(),
        });

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(discovery::serve(socket, endpoint, events, shutdown.clone()));
        tasks.spawn(accept_loop(listener, admission.clone(), shutdown.clone()));
        let scheduler = tokio::spawn(scheduler.run());

        info!("master discovering at {discovery_addr}, serving tasks at {endpoint}");

        Ok(Self {
            admission,
            state,
            discovery_addr,
            endpoint,
            shutdown,
            tasks,
            scheduler,
        })
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    /// The task endpoint handed to announced slaves.
    pub fn endpoint(&self) -> NetworkInfo {
        self.endpoint
    }

    /// Dials a slave listening for masters and registers it.
    ///
    /// # Returns
    /// What the slave advertised about itself.
    pub async fn connect(&self, addr: SocketAddr) -> Result<ServerInfo> {
        let info = self.admission.dial(addr).await?;
        info!("connected to {} at {addr}", info.identity());
        Ok(info)
    }

    /// The latest published snapshot.
    pub fn state(&self) -> MasterState {
        self.state.borrow().clone()
    }

    /// A receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<MasterState> {
        self.state.clone()
    }

    /// Waits until at least `count` slaves are registered.
    pub async fn wait_for_slaves(&self, count: usize) -> Result<MasterState> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|s| s.slaves.len() >= count)
            .await
            .map_err(|_| MasterErr::SchedulerGone)?;
        Ok(snapshot.clone())
    }

    /// Runs `total` replicas of `model` with a random run seed.
    ///
    /// See `run_seeded`.
    pub async fn run(
        &self,
        model: ModelSpec,
        total: usize,
        batch_size: usize,
        deadline: Duration,
    ) -> Result<RunOutcome> {
        self.run_seeded(model, total, batch_size, deadline, rand::random())
            .await
    }

    /// Runs `total` replicas of `model` across the registered slaves.
    ///
    /// Replica `i` always runs with the `i`-th seed drawn from `seed`, so
    /// a run is reproducible regardless of which slaves executed it.
    ///
    /// # Arguments
    /// * `model` - The model every replica runs.
    /// * `total` - How many replicas to run.
    /// * `batch_size` - The most replicas a single slave receives at once.
    /// * `deadline` - How long the whole run may take.
    /// * `seed` - The run seed.
    ///
    /// # Returns
    /// Every result in replica order, or the results merged before the
    /// deadline along with the missing replicas.
    ///
    /// # Errors
    /// `InvalidRun` for a zero batch size and `SchedulerGone` if the master
    /// shut down before the run ended.
    pub async fn run_seeded(
        &self,
        model: ModelSpec,
        total: usize,
        batch_size: usize,
        deadline: Duration,
        seed: u64,
    ) -> Result<RunOutcome> {
        if batch_size == 0 {
            return Err(MasterErr::InvalidRun("batch size must be positive"));
        }
        if total == 0 {
            return Ok(RunOutcome::Completed(Vec::new()));
        }

        let (reply, outcome) = oneshot::channel();
        let request = JobRequest {
            model,
            total,
            batch_size,
            deadline: Instant::now() + deadline,
            seed,
        };

        self.admission
            .events
            .send(Event::Submit { request, reply })
            .map_err(|_| MasterErr::SchedulerGone)?;

        outcome.await.map_err(|_| MasterErr::SchedulerGone)
    }

    /// Closes every slave connection and stops all background tasks.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        let (done, closed) = oneshot::channel();
        if self.admission.events.send(Event::Shutdown { done }).is_ok() {
            let _ = closed.await;
        }

        self.shutdown.cancel();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                warn!("background task failed: {e}");
            }
        }
        if let Err(e) = (&mut self.scheduler).await {
            warn!("scheduler failed: {e}");
        }
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.scheduler.abort();
    }
}

async fn accept_loop(listener: TcpListener, admission: Arc<Admission>, shutdown: CancellationToken) {
    loop {
        let (stream, addr) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept a slave: {e}");
                    continue;
                }
            },
        };

        let admission = admission.clone();
        tokio::spawn(async move {
            match admission.accept(stream).await {
                Ok(info) => info!("{} connected from {addr}", info.identity()),
                Err(e) => warn!("rejected connection from {addr}: {e}"),
            }
        });
    }
}
