use std::{net::SocketAddr, sync::Arc, time::Duration};

use comms::{
    Codec, Connection, DiscoverySocket, Incoming, PlainTransport,
    msg::Msg,
    specs::{
        model::ModelSpec,
        network::{ChannelKind, NetworkInfo, ServerInfo},
    },
};
use master::{Master, MasterConfig, MasterErr, RunOutcome, SlaveStatus};
use simulation::{ExecutorKind, ModelRegistry, models::BirthDeath};
use slave::{Slave, SlaveConfig};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn config() -> MasterConfig {
    MasterConfig {
        discovery_port: 0,
        task_port: 0,
        batch_timeout_ms: 5_000,
        probe_interval_ms: 100,
        liveness_timeout_ms: 5_000,
        handshake_timeout_ms: 2_000,
        ..MasterConfig::default()
    }
}

async fn start(config: MasterConfig) -> Master {
    Master::start(config, Arc::new(PlainTransport)).await.unwrap()
}

/// A real slave announcing itself to `master`.
async fn announcing_slave(name: &str, master: &Master) -> (CancellationToken, JoinHandle<()>) {
    let config = SlaveConfig {
        name: name.into(),
        master_discovery: Some(master.discovery_addr()),
        announce_interval_ms: 20,
        executor: ExecutorKind::Sequential,
        ..SlaveConfig::default()
    };
    let slave = Slave::bind(config, Arc::new(PlainTransport), ModelRegistry::with_builtins())
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { slave.run(shutdown).await.unwrap() }
    });
    (shutdown, running)
}

/// A slave that introduces itself and then never answers anything.
async fn stuck_slave(name: &str) -> ServerInfo {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let info = ServerInfo {
        name: name.into(),
        network: NetworkInfo::new(addr, ChannelKind::Plain),
        models: vec![BirthDeath::KIND.into()],
        threads: 1,
    };

    tokio::spawn({
        let info = info.clone();
        async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::accept(&PlainTransport, stream).await.unwrap();
            conn.send(&Msg::Hello(info)).await.unwrap();
            while let Ok(Incoming::Msg(_)) = conn.recv().await {}
        }
    });

    info
}

/// A real slave masters have to dial.
async fn listening_slave(name: &str) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
    let config = SlaveConfig {
        name: name.into(),
        listen_port: Some(0),
        executor: ExecutorKind::Sequential,
        ..SlaveConfig::default()
    };
    let slave = Slave::bind(config, Arc::new(PlainTransport), ModelRegistry::with_builtins())
        .await
        .unwrap();
    let addr = slave.listen_addr().unwrap();

    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { slave.run(shutdown).await.unwrap() }
    });
    (addr, shutdown, running)
}

fn replicas(results: &[comms::specs::task::ComputationResult]) -> Vec<usize> {
    results.iter().map(|r| r.replica).collect()
}

#[tokio::test]
async fn every_replica_is_returned_exactly_once_in_replica_order() {
    let master = start(config()).await;
    let a = announcing_slave("a", &master).await;
    let b = announcing_slave("b", &master).await;
    timeout(WAIT, master.wait_for_slaves(2)).await.unwrap().unwrap();

    let model = ModelSpec::bare(BirthDeath::KIND);
    let outcome = timeout(WAIT, master.run_seeded(model.clone(), 10, 5, WAIT, 7))
        .await
        .unwrap()
        .unwrap();

    let RunOutcome::Completed(results) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(replicas(&results), (0..10).collect::<Vec<_>>());
    assert!(results.iter().all(|r| r.is_completed()));

    let again = timeout(WAIT, master.run_seeded(model, 10, 3, WAIT, 7))
        .await
        .unwrap()
        .unwrap()
        .into_results();
    let trajectories = |rs: &[comms::specs::task::ComputationResult]| {
        rs.iter().map(|r| r.trajectory().cloned()).collect::<Vec<_>>()
    };
    assert_eq!(trajectories(&results), trajectories(&again));

    let state = master.state();
    assert_eq!(state.runs, 2);
    assert_eq!(state.slaves.len(), 2);
    assert!(state.slaves.values().all(|s| s.throughput.is_some()));

    master.shutdown().await;
    for (shutdown, running) in [a, b] {
        shutdown.cancel();
        timeout(WAIT, running).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn replicas_of_an_unresponsive_slave_are_redispatched() {
    let master = start(MasterConfig {
        batch_timeout_ms: 300,
        ..config()
    })
    .await;

    master
        .connect(stuck_slave("stuck").await.network.socket_addr())
        .await
        .unwrap();
    let (shutdown, _running) = announcing_slave("healthy", &master).await;
    timeout(WAIT, master.wait_for_slaves(2)).await.unwrap().unwrap();

    let outcome = timeout(
        WAIT,
        master.run_seeded(ModelSpec::bare(BirthDeath::KIND), 10, 5, WAIT, 1),
    )
    .await
    .unwrap()
    .unwrap();

    let RunOutcome::Completed(results) = outcome else {
        panic!("the healthy slave should finish the run");
    };
    assert_eq!(replicas(&results), (0..10).collect::<Vec<_>>());

    let state = master.state();
    assert_eq!(state.slaves.len(), 1);
    assert!(state.slaves.keys().all(|identity| identity.starts_with("healthy@")));

    master.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn deadline_returns_what_was_merged_and_what_is_missing() {
    let master = start(config()).await;
    let (shutdown, _running) = announcing_slave("healthy", &master).await;
    timeout(WAIT, master.wait_for_slaves(1)).await.unwrap().unwrap();
    master
        .connect(stuck_slave("stuck").await.network.socket_addr())
        .await
        .unwrap();
    timeout(WAIT, master.wait_for_slaves(2)).await.unwrap().unwrap();

    let outcome = timeout(
        WAIT,
        master.run_seeded(
            ModelSpec::bare(BirthDeath::KIND),
            4,
            2,
            Duration::from_secs(2),
            3,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    let RunOutcome::DeadlineExceeded { partial, missing } = outcome else {
        panic!("the stuck slave should hold the run past its deadline");
    };
    assert_eq!(replicas(&partial), [0, 1]);
    assert_eq!(missing, [2, 3]);

    master.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn silent_slaves_are_evicted_by_the_keep_alive_sweep() {
    let master = start(MasterConfig {
        probe_interval_ms: 50,
        liveness_timeout_ms: 300,
        ..config()
    })
    .await;
    let info = stuck_slave("mute").await;
    let socket = DiscoverySocket::bind("127.0.0.1:0".parse().unwrap(), Codec::default())
        .await
        .unwrap();
    socket
        .send_to(&Msg::Announce(info.clone()), master.discovery_addr())
        .await
        .unwrap();
    let (reply, _) = timeout(WAIT, socket.recv_from()).await.unwrap().unwrap();
    assert!(matches!(reply, Msg::Connect(_)));

    master.connect(info.network.socket_addr()).await.unwrap();
    timeout(WAIT, master.wait_for_slaves(1)).await.unwrap().unwrap();

    // the task channel stays open, only the pings go unanswered
    let mut state = master.subscribe();
    timeout(WAIT, state.wait_for(|s| s.slaves.is_empty()))
        .await
        .unwrap()
        .unwrap();

    master.shutdown().await;
}

#[tokio::test]
async fn slaves_without_the_model_get_no_work() {
    let master = start(config()).await;
    let (shutdown, _running) = announcing_slave("a", &master).await;
    timeout(WAIT, master.wait_for_slaves(1)).await.unwrap().unwrap();

    let outcome = master
        .run_seeded(
            ModelSpec::bare("lotka_volterra"),
            3,
            3,
            Duration::from_millis(200),
            0,
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RunOutcome::DeadlineExceeded {
            partial: Vec::new(),
            missing: vec![0, 1, 2],
        }
    );
    let state = master.state();
    assert!(state.slaves.values().all(|s| s.status == SlaveStatus::Idle));
    assert_eq!(state.slaves.len(), 1);

    master.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn slaves_listening_for_masters_can_be_dialed() {
    let slave_config = SlaveConfig {
        name: "direct".into(),
        listen_port: Some(0),
        executor: ExecutorKind::Parallel {
            threads: 2.try_into().unwrap(),
        },
        ..SlaveConfig::default()
    };
    let slave = Slave::bind(slave_config, Arc::new(PlainTransport), ModelRegistry::with_builtins())
        .await
        .unwrap();
    let addr = slave.listen_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(slave.run(shutdown.clone()));

    let master = start(config()).await;
    let info = master.connect(addr).await.unwrap();
    assert_eq!(info.name, "direct");
    assert_eq!(info.threads, 2);

    let snapshot = master.wait_for_slaves(1).await.unwrap();
    let slave = &snapshot.slaves[&info.identity()];
    assert_eq!((slave.status, slave.load), (SlaveStatus::Idle, 0));

    let results = timeout(WAIT, master.run(ModelSpec::bare(BirthDeath::KIND), 6, 4, WAIT))
        .await
        .unwrap()
        .unwrap()
        .into_results();
    assert_eq!(replicas(&results), (0..6).collect::<Vec<_>>());

    master.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn degenerate_runs_need_no_slaves() {
    let master = start(config()).await;
    let model = ModelSpec::bare(BirthDeath::KIND);

    assert_eq!(
        master.run(model.clone(), 0, 4, WAIT).await.unwrap(),
        RunOutcome::Completed(Vec::new())
    );
    assert!(matches!(
        master.run(model, 4, 0, WAIT).await,
        Err(MasterErr::InvalidRun(_))
    ));

    master.shutdown().await;
}

#[tokio::test]
async fn idle_slaves_leaving_are_noticed_at_once() {
    let (addr, shutdown, running) = listening_slave("leaving").await;
    let master = start(config()).await;
    master.connect(addr).await.unwrap();
    timeout(WAIT, master.wait_for_slaves(1)).await.unwrap().unwrap();

    shutdown.cancel();
    timeout(WAIT, running).await.unwrap().unwrap();

    let mut state = master.subscribe();
    timeout(Duration::from_secs(3), state.wait_for(|s| s.slaves.is_empty()))
        .await
        .unwrap()
        .unwrap();

    master.shutdown().await;
}

#[tokio::test]
async fn model_refused_by_every_slave_fails_the_run_but_keeps_the_slaves() {
    let (addr, shutdown, _running) = listening_slave("picky").await;
    let master = start(config()).await;
    master.connect(addr).await.unwrap();
    timeout(WAIT, master.wait_for_slaves(1)).await.unwrap().unwrap();

    let bad = BirthDeath {
        death_rate: -1.0,
        ..BirthDeath::default()
    };
    let bad = ModelSpec::new(BirthDeath::KIND, &bad).unwrap();
    let outcome = timeout(WAIT, master.run_seeded(bad, 4, 4, WAIT, 5))
        .await
        .unwrap()
        .unwrap();

    let RunOutcome::ModelRejected { partial, missing, .. } = outcome else {
        panic!("the slave cannot build a negative death rate");
    };
    assert!(partial.is_empty());
    assert_eq!(missing, [0, 1, 2, 3]);

    let state = master.state();
    assert_eq!(state.slaves.len(), 1);
    assert!(state.slaves.values().all(|s| s.status == SlaveStatus::Idle));

    let results = timeout(
        WAIT,
        master.run_seeded(ModelSpec::bare(BirthDeath::KIND), 4, 4, WAIT, 5),
    )
    .await
    .unwrap()
    .unwrap()
    .into_results();
    assert_eq!(replicas(&results), [0, 1, 2, 3]);

    master.shutdown().await;
    shutdown.cancel();
}
