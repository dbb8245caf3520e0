use std::{net::SocketAddr, sync::Arc, time::Duration};

use comms::{
    Channel, ChannelOptions, CodecKind, Compression, Connection, Incoming,
    msg::{MasterCommand, Msg, SlaveCommand},
    specs::{
        model::ModelSpec,
        network::{ChannelKind, NetworkInfo, ServerInfo},
        task::{NetworkTask, SimulationTask, TaskOutcome, Trajectory},
    },
};
use rand::{Rng, rngs::StdRng};
use simulation::{ExecutorKind, Model, ModelRegistry};
use slave::{Session, SessionEnd, SessionState, SlaveErr};
use tokio::{io::duplex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct Echo;

impl Model for Echo {
    fn simulate(&self, rng: &mut StdRng) -> simulation::Result<Trajectory> {
        let mut t = Trajectory::default();
        t.push(0.0, vec![rng.random::<f64>()]);
        Ok(t)
    }
}

struct Slow;

impl Model for Slow {
    fn simulate(&self, _rng: &mut StdRng) -> simulation::Result<Trajectory> {
        std::thread::sleep(Duration::from_millis(100));
        Ok(Trajectory::default())
    }
}

struct Fragile;

impl Model for Fragile {
    fn simulate(&self, rng: &mut StdRng) -> simulation::Result<Trajectory> {
        if rng.random::<bool>() {
            panic!("fragile replica");
        }
        Ok(Trajectory::default())
    }
}

fn registry() -> ModelRegistry {
    let mut registry = ModelRegistry::new();
    registry.register("echo", |_| Ok(Arc::new(Echo) as Arc<dyn Model>));
    registry.register("slow", |_| Ok(Arc::new(Slow) as Arc<dyn Model>));
    registry.register("fragile", |_| Ok(Arc::new(Fragile) as Arc<dyn Model>));
    registry
}

fn info() -> ServerInfo {
    let addr: SocketAddr = "127.0.0.1:6100".parse().unwrap();
    ServerInfo {
        name: "test-slave".into(),
        network: NetworkInfo::new(addr, ChannelKind::Plain),
        models: registry().kinds(),
        threads: 2,
    }
}

async fn pair(options: ChannelOptions) -> (Connection, Connection) {
    let (a, b) = duplex(1 << 16);
    let (master, slave) = tokio::join!(Channel::dial(a, options), Channel::accept(b));
    (
        Connection::new(Box::new(master.unwrap())),
        Connection::new(Box::new(slave.unwrap())),
    )
}

type Outcome = (SessionState, u64, Result<SessionEnd, SlaveErr>);

fn spawn_session(conn: Connection, executor: ExecutorKind) -> JoinHandle<Outcome> {
    spawn_stoppable(conn, executor, CancellationToken::new())
}

fn spawn_stoppable(
    mut conn: Connection,
    executor: ExecutorKind,
    shutdown: CancellationToken,
) -> JoinHandle<Outcome> {
    tokio::spawn(async move {
        let mut session = Session::new(info(), Arc::new(registry()), executor).unwrap();
        let res = session.run(&mut conn, &shutdown).await;
        (session.state(), session.batches(), res)
    })
}

async fn recv(conn: &mut Connection) -> Msg {
    match conn.recv().await.unwrap() {
        Incoming::Msg(msg) => msg,
        Incoming::EndOfSession => panic!("session ended early"),
    }
}

async fn handshake(conn: &mut Connection, kind: &str) {
    assert_eq!(recv(conn).await, Msg::Hello(info()));
    conn.send(&Msg::Master(MasterCommand::Init(ModelSpec::bare(kind))))
        .await
        .unwrap();
    assert_eq!(recv(conn).await, Msg::Slave(SlaveCommand::InitResponse));
}

fn tasks(batch: u64, replicas: impl IntoIterator<Item = usize>) -> NetworkTask {
    let tasks = replicas
        .into_iter()
        .map(|r| SimulationTask::new(r, r as u64 * 7919))
        .collect();
    NetworkTask::new(batch, tasks)
}

#[tokio::test]
async fn serves_batches_until_close_connection() {
    let options = ChannelOptions {
        codec: CodecKind::Bincode,
        compression: Compression::from_flag(true),
    };
    let (mut master, slave) = pair(options).await;
    let handle = spawn_session(slave, ExecutorKind::default());

    handshake(&mut master, "echo").await;

    for (batch, replicas) in [(1, vec![4, 5, 6]), (2, vec![0, 9])] {
        master
            .send(&Msg::Task(tasks(batch, replicas.clone())))
            .await
            .unwrap();

        let Msg::Results(results) = recv(&mut master).await else {
            panic!("expected results");
        };
        assert_eq!(results.batch, batch);
        assert_eq!(
            results.results.iter().map(|r| r.replica).collect::<Vec<_>>(),
            replicas
        );
        assert!(results.results.iter().all(|r| r.is_completed()));
    }

    master.send(&Msg::Master(MasterCommand::Ping)).await.unwrap();
    assert_eq!(recv(&mut master).await, Msg::Slave(SlaveCommand::Pong));

    master
        .send(&Msg::Master(MasterCommand::CloseConnection))
        .await
        .unwrap();
    assert_eq!(recv(&mut master).await, Msg::Slave(SlaveCommand::CloseConnection));
    assert_eq!(master.recv().await.unwrap(), Incoming::EndOfSession);

    let (state, batches, res) = handle.await.unwrap();
    assert_eq!(state, SessionState::Closed);
    assert_eq!(batches, 2);
    assert_eq!(res.unwrap(), SessionEnd::CloseRequested);
}

#[tokio::test]
async fn peer_eof_while_idle_ends_cleanly() {
    let (mut master, slave) = pair(ChannelOptions::default()).await;
    let handle = spawn_session(slave, ExecutorKind::Sequential);

    handshake(&mut master, "echo").await;
    master.close().await.unwrap();

    let (state, batches, res) = handle.await.unwrap();
    assert_eq!(state, SessionState::Closed);
    assert_eq!(batches, 0);
    assert_eq!(res.unwrap(), SessionEnd::PeerClosed);
}

#[tokio::test]
async fn tasks_need_a_model_first() {
    let (mut master, slave) = pair(ChannelOptions::default()).await;
    let handle = spawn_session(slave, ExecutorKind::Sequential);

    assert!(matches!(recv(&mut master).await, Msg::Hello(_)));

    master.send(&Msg::Task(tasks(1, [0]))).await.unwrap();
    assert!(matches!(recv(&mut master).await, Msg::Err(_)));

    master
        .send(&Msg::Master(MasterCommand::Init(ModelSpec::bare("gillespie"))))
        .await
        .unwrap();
    let Msg::Err(reason) = recv(&mut master).await else {
        panic!("expected the model to be rejected");
    };
    assert!(reason.contains("gillespie"));

    master
        .send(&Msg::Master(MasterCommand::Init(ModelSpec::bare("echo"))))
        .await
        .unwrap();
    assert_eq!(recv(&mut master).await, Msg::Slave(SlaveCommand::InitResponse));

    master.send(&Msg::Task(tasks(2, [0]))).await.unwrap();
    assert!(matches!(recv(&mut master).await, Msg::Results(r) if r.batch == 2));

    drop(master);
    let (_, batches, res) = handle.await.unwrap();
    assert_eq!(batches, 1);
    assert_eq!(res.unwrap(), SessionEnd::PeerClosed);
}

#[tokio::test]
async fn faulty_replicas_are_reported_in_their_slot() {
    let (mut master, slave) = pair(ChannelOptions::default()).await;
    let handle = spawn_session(slave, ExecutorKind::default());

    handshake(&mut master, "fragile").await;
    master.send(&Msg::Task(tasks(7, 0..32))).await.unwrap();

    let Msg::Results(results) = recv(&mut master).await else {
        panic!("expected results");
    };
    assert_eq!(results.results.len(), 32);
    assert!(
        results
            .results
            .iter()
            .any(|r| matches!(r.outcome, TaskOutcome::Failed(_)))
    );
    assert!(results.results.iter().any(|r| r.is_completed()));

    master
        .send(&Msg::Master(MasterCommand::CloseConnection))
        .await
        .unwrap();
    let (_, _, res) = handle.await.unwrap();
    assert_eq!(res.unwrap(), SessionEnd::CloseRequested);
}

#[tokio::test]
async fn losing_the_master_mid_batch_is_fatal_for_the_session() {
    let (mut master, slave) = pair(ChannelOptions::default()).await;
    let handle = spawn_session(slave, ExecutorKind::Sequential);

    handshake(&mut master, "slow").await;
    master.send(&Msg::Task(tasks(1, [0, 1]))).await.unwrap();
    drop(master);

    let (state, _, res) = handle.await.unwrap();
    assert_eq!(state, SessionState::Closed);
    assert!(res.is_err());
}

#[tokio::test]
async fn stopping_slave_says_goodbye_before_closing() {
    let (mut master, slave) = pair(ChannelOptions::default()).await;
    let shutdown = CancellationToken::new();
    let handle = spawn_stoppable(slave, ExecutorKind::Sequential, shutdown.clone());

    handshake(&mut master, "echo").await;
    shutdown.cancel();

    assert_eq!(recv(&mut master).await, Msg::Slave(SlaveCommand::CloseConnection));
    assert_eq!(master.recv().await.unwrap(), Incoming::EndOfSession);

    let (state, _, res) = handle.await.unwrap();
    assert_eq!(state, SessionState::Closed);
    assert_eq!(res.unwrap(), SessionEnd::ShuttingDown);
}
