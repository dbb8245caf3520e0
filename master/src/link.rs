use std::time::Duration;

use comms::{
    CommsErr, Connection, Incoming,
    msg::{MasterCommand, Msg, SlaveCommand},
    specs::{
        model::ModelSpec,
        network::ServerInfo,
        task::{ComputationResult, NetworkTask},
    },
};
use log::{debug, warn};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{registry::SlaveId, scheduler::Event};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands the scheduler sends to a slave's link.
#[derive(Debug)]
pub(crate) enum LinkCmd {
    Dispatch { model: ModelSpec, task: NetworkTask },
    Close,
}

/// The scheduler's handle on the task owning one slave connection.
pub(crate) struct Link {
    cmds: UnboundedSender<LinkCmd>,
    task: JoinHandle<()>,
}

impl Link {
    /// Spawns the task driving `conn` on behalf of slave `id`.
    pub fn spawn(id: SlaveId, conn: Connection, events: UnboundedSender<Event>) -> Self {
        let (cmds, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(id, conn, rx, events));
        Self { cmds, task }
    }

    #[cfg(test)]
    pub fn detached() -> Self {
        Self::channel().0
    }

    /// A link whose commands end up in the returned receiver.
    #[cfg(test)]
    pub fn channel() -> (Self, UnboundedReceiver<LinkCmd>) {
        let (cmds, rx) = mpsc::unbounded_channel();
        let link = Self {
            cmds,
            task: tokio::spawn(async {}),
        };
        (link, rx)
    }

    /// Queues a batch, `false` if the link already stopped.
    pub fn dispatch(&self, model: ModelSpec, task: NetworkTask) -> bool {
        self.cmds.send(LinkCmd::Dispatch { model, task }).is_ok()
    }

    /// Asks the link to end the session gracefully.
    ///
    /// # Returns
    /// The link's task handle, to await its completion.
    pub fn close(self) -> JoinHandle<()> {
        let _ = self.cmds.send(LinkCmd::Close);
        self.task
    }

    /// Drops the connection immediately.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Waits for the `Hello` every slave opens a task channel with.
///
/// # Errors
/// A `CommsErr` if the slave closes, sends something else or stays
/// silent for longer than `timeout`.
pub(crate) async fn handshake(conn: &mut Connection, timeout: Duration) -> comms::Result<ServerInfo> {
    let msg = time::timeout(timeout, next(conn))
        .await
        .map_err(|_| CommsErr::Protocol("slave did not introduce itself in time".into()))??;

    match msg {
        Msg::Hello(info) => Ok(info),
        other => Err(unexpected(&other)),
    }
}

/// How a slave answered a dispatched batch.
enum Answer {
    Results(Vec<ComputationResult>),
    /// The slave could not build the model, the session stays usable.
    Rejected(String),
}

async fn drive(
    id: SlaveId,
    mut conn: Connection,
    mut cmds: UnboundedReceiver<LinkCmd>,
    events: UnboundedSender<Event>,
) {
    let mut installed: Option<ModelSpec> = None;

    loop {
        // between batches the slave only speaks to leave
        let cmd = tokio::select! {
            cmd = cmds.recv() => cmd,
            incoming = conn.recv() => match unsolicited(incoming) {
                Some(reason) => {
                    let _ = events.send(Event::Lost { slave: id, reason });
                    break;
                }
                None => continue,
            },
        };

        let Some(cmd) = cmd else {
            break;
        };

        match cmd {
            LinkCmd::Dispatch { model, task } => {
                let batch = task.batch;
                let tasks = task.len();
                let start = Instant::now();

                let event = match exchange(&mut conn, &mut installed, model, task).await {
                    Ok(Answer::Results(results)) => {
                        let elapsed = start.elapsed();
                        debug!(slave = id, batch = batch; "batch answered: tasks={tasks} elapsed={elapsed:?}");
                        Event::Completed {
                            slave: id,
                            batch,
                            results,
                            elapsed,
                        }
                    }
                    Ok(Answer::Rejected(reason)) => Event::Rejected {
                        slave: id,
                        batch,
                        reason,
                    },
                    Err(e) => {
                        let _ = events.send(Event::Lost {
                            slave: id,
                            reason: e.to_string(),
                        });
                        break;
                    }
                };
                let _ = events.send(event);
            }
            LinkCmd::Close => {
                if let Err(e) = close(&mut conn).await {
                    debug!(slave = id; "closing the session failed: {e}");
                }
                return;
            }
        }
    }

    let _ = conn.close().await;
}

/// Classifies what arrived while no batch was out.
///
/// # Returns
/// Why the link must stop, or `None` if the message can be ignored.
fn unsolicited(incoming: comms::Result<Incoming>) -> Option<String> {
    match incoming {
        Ok(Incoming::Msg(Msg::Slave(SlaveCommand::Pong))) => None,
        Ok(Incoming::Msg(Msg::Slave(SlaveCommand::CloseConnection))) => {
            Some("slave closed the session".into())
        }
        Ok(Incoming::Msg(other)) => {
            warn!("ignoring an unsolicited {} message", other.kind());
            None
        }
        Ok(Incoming::EndOfSession) => Some("slave ended the session".into()),
        Err(e) if e.is_message_scoped() => {
            warn!("dropping undecodable message: {e}");
            None
        }
        Err(e) => Some(e.to_string()),
    }
}

/// Runs one batch on the slave, installing `model` first when needed.
///
/// # Returns
/// The batch results, one per task and in task order, or the slave's
/// reason for refusing the model.
async fn exchange(
    conn: &mut Connection,
    installed: &mut Option<ModelSpec>,
    model: ModelSpec,
    task: NetworkTask,
) -> comms::Result<Answer> {
    if installed.as_ref() != Some(&model) {
        conn.send(&Msg::Master(MasterCommand::Init(model.clone())))
            .await?;

        match next(conn).await? {
            Msg::Slave(SlaveCommand::InitResponse) => *installed = Some(model),
            Msg::Err(reason) => return Ok(Answer::Rejected(reason)),
            other => return Err(unexpected(&other)),
        }
    }

    let batch = task.batch;
    let replicas: Vec<usize> = task.replicas().collect();
    conn.send(&Msg::Task(task)).await?;

    loop {
        match next(conn).await? {
            Msg::Results(answer) if answer.batch == batch => {
                let answered = answer.results.iter().map(|r| r.replica);
                if !answered.eq(replicas.iter().copied()) {
                    return Err(CommsErr::Protocol(format!(
                        "results of batch {batch} do not match its tasks"
                    )));
                }
                return Ok(Answer::Results(answer.results));
            }
            Msg::Results(answer) => {
                warn!(batch = answer.batch; "ignoring results of a batch not in flight");
            }
            Msg::Err(reason) => {
                return Err(CommsErr::Protocol(format!("batch {batch} failed: {reason}")));
            }
            other => return Err(unexpected(&other)),
        }
    }
}

async fn close(conn: &mut Connection) -> comms::Result<()> {
    conn.send(&Msg::Master(MasterCommand::CloseConnection))
        .await?;

    let echo = async {
        loop {
            match conn.recv().await {
                Ok(Incoming::Msg(Msg::Slave(SlaveCommand::CloseConnection)))
                | Ok(Incoming::EndOfSession) => return Ok(()),
                Ok(Incoming::Msg(_)) => continue,
                Err(e) if e.is_message_scoped() => continue,
                Err(e) => return Err(e),
            }
        }
    };

    match time::timeout(CLOSE_TIMEOUT, echo).await {
        Ok(res) => res?,
        Err(_) => debug!("slave did not echo the close in time"),
    }

    conn.close().await
}

/// The next message worth acting on. Late pongs are skipped and messages
/// that fail to decode are logged and dropped.
async fn next(conn: &mut Connection) -> comms::Result<Msg> {
    loop {
        match conn.recv().await {
            Ok(Incoming::Msg(Msg::Slave(SlaveCommand::Pong))) => continue,
            Ok(Incoming::Msg(msg)) => return Ok(msg),
            Ok(Incoming::EndOfSession) => {
                return Err(CommsErr::Protocol("slave ended the session".into()));
            }
            Err(e) if e.is_message_scoped() => warn!("dropping undecodable message: {e}"),
            Err(e) => return Err(e),
        }
    }
}

fn unexpected(msg: &Msg) -> CommsErr {
    CommsErr::Protocol(format!("unexpected {} message", msg.kind()))
}
