use std::{sync::Arc, time::Instant};

use comms::{
    Connection, Incoming,
    msg::{MasterCommand, Msg, SlaveCommand},
    specs::{
        model::ModelSpec,
        network::ServerInfo,
        task::{NetworkTask, ResultBatch},
    },
};
use log::{debug, info, warn};
use simulation::{ExecutionEnvironment, ExecutorKind, Model, ModelRegistry};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Where a session stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Ready,
    Executing,
    Reporting,
    Closed,
}

/// How a session finished when it finished cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The master sent `CloseConnection`.
    CloseRequested,
    /// The master ended the stream.
    PeerClosed,
    /// The slave is stopping and told the master so.
    ShuttingDown,
}

/// Serves one master connection: installs models, runs batches one at a time
/// and reports their results.
pub struct Session {
    info: ServerInfo,
    models: Arc<ModelRegistry>,
    environment: Arc<dyn ExecutionEnvironment>,
    model: Option<(ModelSpec, Arc<dyn Model>)>,
    state: SessionState,
    batches: u64,
}

impl Session {
    /// Creates a new `Session` with its own execution environment.
    ///
    /// # Args
    /// * `info` - The identity sent to the master.
    /// * `models` - The models this slave can build.
    /// * `executor` - The environment to build for this session.
    ///
    /// # Errors
    /// Fails if the environment's pool can't be built.
    pub fn new(info: ServerInfo, models: Arc<ModelRegistry>, executor: ExecutorKind) -> Result<Self> {
        Ok(Self {
            info,
            models,
            environment: executor.build()?,
            model: None,
            state: SessionState::AwaitingHandshake,
            batches: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The number of batches executed so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Runs the session until the master closes it or `shutdown` is cancelled.
    ///
    /// A batch already executing is finished and reported before the
    /// session leaves on shutdown.
    ///
    /// # Args
    /// * `conn` - The connection to the master.
    /// * `shutdown` - Cancelled when the slave stops.
    ///
    /// # Returns
    /// How the session ended when it ended cleanly.
    ///
    /// # Errors
    /// Returns `SlaveErr` on any fault that leaves the connection unusable.
    pub async fn run(
        &mut self,
        conn: &mut Connection,
        shutdown: &CancellationToken,
    ) -> Result<SessionEnd> {
        let res = self.serve(conn, shutdown).await;
        self.state = SessionState::Closed;

        if let Err(e) = conn.close().await {
            debug!("closing the master connection failed: {e}");
        }

        res
    }

    async fn serve(&mut self, conn: &mut Connection, shutdown: &CancellationToken) -> Result<SessionEnd> {
        conn.send(&Msg::Hello(self.info.clone())).await?;

        loop {
            let incoming = tokio::select! {
                incoming = conn.recv() => Some(incoming),
                _ = shutdown.cancelled() => None,
            };

            let Some(incoming) = incoming else {
                info!(batches = self.batches; "leaving the session, slave is shutting down");
                conn.send(&Msg::Slave(SlaveCommand::CloseConnection)).await?;
                return Ok(SessionEnd::ShuttingDown);
            };

            let msg = match incoming {
                Ok(Incoming::Msg(msg)) => msg,
                Ok(Incoming::EndOfSession) => {
                    info!(batches = self.batches; "master ended the session");
                    return Ok(SessionEnd::PeerClosed);
                }
                Err(e) if e.is_message_scoped() => {
                    warn!("discarding undecodable message: {e}");
                    conn.send(&Msg::Err(e.to_string())).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match (self.state, msg) {
                (_, Msg::Master(MasterCommand::CloseConnection)) => {
                    info!(batches = self.batches; "master closed the session");
                    conn.send(&Msg::Slave(SlaveCommand::CloseConnection)).await?;
                    return Ok(SessionEnd::CloseRequested);
                }
                (_, Msg::Master(MasterCommand::Ping)) => {
                    conn.send(&Msg::Slave(SlaveCommand::Pong)).await?;
                }
                (_, Msg::Master(MasterCommand::Init(spec))) => self.install(conn, spec).await?,
                (SessionState::Ready, Msg::Task(batch)) => self.execute(conn, batch).await?,
                (state, msg) => {
                    let detail = format!("unexpected {} while {state:?}", msg.kind());
                    warn!("{detail}");
                    conn.send(&Msg::Err(detail)).await?;
                }
            }
        }
    }

    async fn install(&mut self, conn: &mut Connection, spec: ModelSpec) -> Result<()> {
        if self.model.as_ref().is_some_and(|(installed, _)| *installed == spec) {
            return Ok(conn.send(&Msg::Slave(SlaveCommand::InitResponse)).await?);
        }

        match self.models.resolve(&spec) {
            Ok(model) => {
                info!(model = spec.kind.as_str(); "model installed");
                self.model = Some((spec, model));
                self.state = SessionState::Ready;
                conn.send(&Msg::Slave(SlaveCommand::InitResponse)).await?;
            }
            Err(e) => {
                warn!(model = spec.kind.as_str(); "rejecting model: {e}");
                conn.send(&Msg::Err(e.to_string())).await?;
            }
        }

        Ok(())
    }

    async fn execute(&mut self, conn: &mut Connection, batch: NetworkTask) -> Result<()> {
        let model = match &self.model {
            Some((_, model)) => Arc::clone(model),
            // Ready is only reached with a model installed
            None => return Ok(conn.send(&Msg::Err("no model installed".into())).await?),
        };

        self.state = SessionState::Executing;

        let id = batch.batch;
        let tasks = batch.len();
        let environment = Arc::clone(&self.environment);

        let start = Instant::now();
        let results = task::spawn_blocking(move || environment.run(model.as_ref(), &batch)).await?;
        debug!(batch = id, tasks = tasks, elapsed_ms = start.elapsed().as_millis() as u64; "batch executed");

        self.state = SessionState::Reporting;
        conn.send(&Msg::Results(ResultBatch { batch: id, results })).await?;

        self.batches += 1;
        self.state = SessionState::Ready;
        Ok(())
    }
}
