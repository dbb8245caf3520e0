//! The single owner of the registry and the current run.
//!
//! Every other task talks to the scheduler through `Event`s, so registry
//! changes, dispatches and merges are applied one at a time and a
//! published `MasterState` is always consistent.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};

use comms::{
    DiscoverySocket,
    msg::{MasterCommand, Msg},
    specs::{
        network::ServerInfo,
        task::{ComputationResult, NetworkTask},
    },
};
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::{
    sync::{
        mpsc::UnboundedReceiver,
        oneshot, watch,
    },
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    config::MasterConfig,
    job::{Job, JobId, JobRequest, RunOutcome},
    link::Link,
    partition,
    registry::{Registry, SlaveEntry, SlaveId},
    state::MasterState,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything that may change the scheduler's view of the world.
pub(crate) enum Event {
    /// A slave completed the task channel handshake.
    Joined {
        slave: SlaveId,
        info: ServerInfo,
        link: Link,
    },
    Completed {
        slave: SlaveId,
        batch: u64,
        results: Vec<ComputationResult>,
        elapsed: Duration,
    },
    /// The slave could not build the run's model but stays connected.
    Rejected {
        slave: SlaveId,
        batch: u64,
        reason: String,
    },
    /// The slave's connection failed, it must be evicted.
    Lost { slave: SlaveId, reason: String },
    /// A slave announced itself from `from` over discovery.
    Announced { identity: String, from: SocketAddr },
    /// A probe answer arrived from `from`.
    Alive { from: SocketAddr },
    Submit {
        request: JobRequest,
        reply: oneshot::Sender<RunOutcome>,
    },
    Shutdown { done: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SchedulerConfig {
    pub batch_timeout: Duration,
    pub probe_interval: Duration,
    pub liveness_timeout: Duration,
}

impl From<&MasterConfig> for SchedulerConfig {
    fn from(config: &MasterConfig) -> Self {
        Self {
            batch_timeout: config.batch_timeout(),
            probe_interval: config.probe_interval(),
            liveness_timeout: config.liveness_timeout(),
        }
    }
}

/// A batch handed to a slave and not answered yet.
struct InFlight {
    slave: SlaveId,
    job: JobId,
    replicas: Vec<usize>,
    deadline: Instant,
}

pub(crate) struct Scheduler {
    config: SchedulerConfig,
    events: UnboundedReceiver<Event>,
    probes: Arc<DiscoverySocket>,
    state: watch::Sender<MasterState>,
    registry: Registry,
    /// Announcements of slaves not registered yet, with when they arrived.
    announced: HashMap<String, (SocketAddr, Instant)>,
    queue: VecDeque<(JobRequest, oneshot::Sender<RunOutcome>)>,
    job: Option<(Job, oneshot::Sender<RunOutcome>)>,
    in_flight: HashMap<u64, InFlight>,
    next_job: JobId,
    next_batch: u64,
    runs: u64,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        events: UnboundedReceiver<Event>,
        probes: Arc<DiscoverySocket>,
        state: watch::Sender<MasterState>,
    ) -> Self {
        Self {
            config,
            events,
            probes,
            state,
            registry: Registry::default(),
            announced: HashMap::new(),
            queue: VecDeque::new(),
            job: None,
            in_flight: HashMap::new(),
            next_job: 0,
            next_batch: 0,
            runs: 0,
        }
    }

    /// Processes events until shut down or every sender is gone.
    pub async fn run(mut self) {
        let mut probe = time::interval(self.config.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = self.next_wake();

            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        self.shutdown().await;
                        return;
                    };
                    if let ControlFlow::Break(done) = self.handle(event) {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                }
                _ = time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                    self.expire(Instant::now());
                }
                _ = probe.tick() => self.probe(),
            }

            self.schedule();
            self.publish();
        }
    }

    fn handle(&mut self, event: Event) -> ControlFlow<oneshot::Sender<()>> {
        match event {
            Event::Joined { slave, info, link } => {
                let identity = info.identity();
                if let Some(previous) = self.registry.by_identity(&identity) {
                    self.evict(previous, "replaced by a new connection");
                }

                info!(slave = slave; "{identity} joined");
                let probe = self.announced.remove(&identity).map(|(addr, _)| addr);
                self.registry
                    .insert(SlaveEntry::new(slave, info, link, probe));
            }
            Event::Completed {
                slave,
                batch,
                results,
                elapsed,
            } => self.complete(slave, batch, results, elapsed),
            Event::Rejected {
                slave,
                batch,
                reason,
            } => self.reject(slave, batch, reason),
            Event::Lost { slave, reason } => self.evict(slave, &reason),
            Event::Announced { identity, from } => {
                match self.registry.by_identity(&identity) {
                    Some(slave) => self.registry.set_probe(slave, from),
                    None => {
                        self.announced.insert(identity, (from, Instant::now()));
                    }
                }
            }
            Event::Alive { from } => {
                if !self.registry.seen_at(from) {
                    debug!("probe answer from unknown {from}");
                }
            }
            Event::Submit { request, reply } => self.queue.push_back((request, reply)),
            Event::Shutdown { done } => return ControlFlow::Break(done),
        }

        ControlFlow::Continue(())
    }

    fn complete(
        &mut self,
        slave: SlaveId,
        batch: u64,
        results: Vec<ComputationResult>,
        elapsed: Duration,
    ) {
        let flight = self.in_flight.remove(&batch);
        self.registry.mark_idle(slave, results.len(), elapsed);

        match (flight, self.job.as_mut()) {
            (Some(flight), Some((job, _))) if flight.job == job.id && flight.slave == slave => {
                let merged = job.merge(results);
                debug!(slave = slave, batch = batch; "merged {merged} results");
            }
            _ => debug!(slave = slave, batch = batch; "discarding results of an untracked batch"),
        }
    }

    /// Returns the replicas of a batch whose model the slave refused and
    /// keeps that slave out of the current run.
    fn reject(&mut self, slave: SlaveId, batch: u64, reason: String) {
        let flight = self.in_flight.remove(&batch);
        self.registry.mark_idle(slave, 0, Duration::ZERO);

        match (flight, self.job.as_mut()) {
            (Some(flight), Some((job, _))) if flight.job == job.id => {
                warn!(slave = slave, job = job.id; "slave cannot build the model: {reason}");
                job.requeue(flight.replicas);
                job.exclude(slave, reason);
            }
            _ => debug!(slave = slave, batch = batch; "model of an untracked batch rejected"),
        }
    }

    /// Hands pending replicas of the current run to idle slaves.
    fn schedule(&mut self) {
        self.start_next();
        while let Some((job, _)) = self.job.as_ref() {
            if job.is_complete() {
                self.finish(Job::into_outcome);
            } else if self.unservable(job) {
                self.finish(Job::into_rejected);
            } else {
                break;
            }
            self.start_next();
        }

        let Some((job, _)) = self.job.as_mut() else {
            return;
        };

        let idle: Vec<_> = self
            .registry
            .idle_for(&job.model.kind)
            .into_iter()
            .filter(|c| !job.excludes(c.slave))
            .collect();
        let shares = partition::allocate(job.pending(), job.batch_size, &idle);
        let deadline = Instant::now() + self.config.batch_timeout;
        let mut stopped = Vec::new();

        for (slave, count) in shares {
            let tasks = job.take(count);
            let replicas: Vec<usize> = tasks.iter().map(|t| t.replica).collect();
            let batch = self.next_batch;
            self.next_batch += 1;

            let sent = self
                .registry
                .get(slave)
                .is_some_and(|e| e.link.dispatch(job.model.clone(), NetworkTask::new(batch, tasks)));

            if !sent {
                job.requeue(replicas);
                stopped.push(slave);
                continue;
            }

            debug!(slave = slave, batch = batch; "dispatched {} replicas", replicas.len());
            self.registry.mark_busy(slave, replicas.len());
            self.in_flight.insert(
                batch,
                InFlight {
                    slave,
                    job: job.id,
                    replicas,
                    deadline,
                },
            );
        }

        for slave in stopped {
            self.evict(slave, "link stopped");
        }
    }

    fn start_next(&mut self) {
        if self.job.is_some() {
            return;
        }

        while let Some((request, reply)) = self.queue.pop_front() {
            if reply.is_closed() {
                continue;
            }

            let id = self.next_job;
            self.next_job += 1;
            info!(job = id; "starting a run of {} replicas", request.total);
            self.job = Some((Job::new(id, request), reply));
            return;
        }
    }

    /// Whether every slave able to run the current model refused it and
    /// none of its batches is still out.
    fn unservable(&self, job: &Job) -> bool {
        job.rejection().is_some()
            && !self.in_flight.values().any(|f| f.job == job.id)
            && self
                .registry
                .able_to_run(&job.model.kind)
                .all(|slave| job.excludes(slave))
    }

    fn finish(&mut self, end: impl FnOnce(Job) -> RunOutcome) {
        let Some((job, reply)) = self.job.take() else {
            return;
        };

        let id = job.id;
        let outcome = end(job);
        match &outcome {
            RunOutcome::Completed(results) => {
                info!(job = id; "run completed with {} results", results.len());
            }
            RunOutcome::DeadlineExceeded { partial, missing } => {
                warn!(job = id; "run deadline exceeded: {} merged, {} missing", partial.len(), missing.len());
            }
            RunOutcome::ModelRejected { reason, missing, .. } => {
                warn!(job = id; "no slave can build the model, {} replicas missing: {reason}", missing.len());
            }
        }

        self.runs += 1;
        self.publish();
        let _ = reply.send(outcome);
    }

    /// Removes a slave and returns its outstanding replicas to the pool.
    fn evict(&mut self, slave: SlaveId, reason: &str) {
        let Some(entry) = self.registry.remove(slave) else {
            return;
        };

        warn!(slave = slave; "evicting {}: {reason}", entry.info.identity());
        entry.link.abort();

        let lost: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.slave == slave)
            .map(|(batch, _)| *batch)
            .collect();

        for batch in lost {
            let Some(flight) = self.in_flight.remove(&batch) else {
                continue;
            };
            match self.job.as_mut() {
                Some((job, _)) if job.id == flight.job => job.requeue(flight.replicas),
                _ => {}
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let batches = self.in_flight.values().map(|f| f.deadline);
        let run = self.job.as_ref().map(|(job, _)| job.deadline);
        batches.chain(run).min()
    }

    fn expire(&mut self, now: Instant) {
        let late: Vec<(u64, SlaveId)> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(batch, f)| (*batch, f.slave))
            .collect();

        for (batch, slave) in late {
            self.evict(slave, &format!("batch {batch} missed its deadline"));
        }

        if self.job.as_ref().is_some_and(|(job, _)| job.deadline <= now) {
            self.finish(Job::into_outcome);
        }
    }

    /// Evicts silent slaves, pings the rest and forgets stale announcements.
    fn probe(&mut self) {
        let now = Instant::now();
        let timeout = self.config.liveness_timeout;
        self.announced
            .retain(|_, (_, at)| now.saturating_duration_since(*at) <= timeout);

        let silent = self.registry.silent(now, timeout);
        for slave in silent {
            self.evict(slave, "stopped answering probes");
        }

        let targets = self.registry.probes();
        if targets.is_empty() {
            return;
        }

        let socket = self.probes.clone();
        tokio::spawn(async move {
            let ping = Msg::Master(MasterCommand::Ping);
            for addr in targets {
                if let Err(e) = socket.send_to(&ping, addr).await {
                    debug!("failed to probe {addr}: {e}");
                }
            }
        });
    }

    fn publish(&self) {
        let (pending, merged) = self
            .job
            .as_ref()
            .map_or((0, 0), |(job, _)| (job.pending(), job.merged()));

        self.state.send_replace(MasterState {
            slaves: self.registry.snapshots().collect(),
            pending,
            in_flight: self.in_flight.len(),
            merged,
            runs: self.runs,
        });
    }

    async fn shutdown(&mut self) {
        self.queue.clear();
        self.job = None;
        self.in_flight.clear();

        let links: Vec<_> = self.registry.drain().map(|e| e.link.close()).collect();
        info!("closing {} slave connections", links.len());

        if time::timeout(SHUTDOWN_GRACE, join_all(links)).await.is_err() {
            warn!("some slaves did not close in time");
        }

        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use comms::{
        Codec, CodecKind,
        specs::{
            model::ModelSpec,
            network::{ChannelKind, NetworkInfo},
            task::Trajectory,
        },
    };
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::link::LinkCmd;

    const KIND: &str = "birth_death";

    async fn scheduler() -> Scheduler {
        let (_, inbox) = mpsc::unbounded_channel();
        let socket = DiscoverySocket::bind(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            Codec::new(CodecKind::Json),
        )
        .await
        .unwrap();
        let (state, _) = watch::channel(MasterState::default());
        let config = SchedulerConfig {
            batch_timeout: Duration::from_secs(60),
            probe_interval: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(5),
        };

        Scheduler::new(config, inbox, Arc::new(socket), state)
    }

    fn info(name: &str) -> ServerInfo {
        ServerInfo {
            name: name.into(),
            network: NetworkInfo::new(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000),
                ChannelKind::Plain,
            ),
            models: vec![KIND.into()],
            threads: 1,
        }
    }

    fn join(scheduler: &mut Scheduler, slave: SlaveId, name: &str) -> UnboundedReceiver<LinkCmd> {
        let (link, cmds) = Link::channel();
        let _ = scheduler.handle(Event::Joined {
            slave,
            info: info(name),
            link,
        });
        cmds
    }

    fn submit(scheduler: &mut Scheduler, total: usize, batch_size: usize) -> oneshot::Receiver<RunOutcome> {
        let (reply, outcome) = oneshot::channel();
        let request = JobRequest {
            model: ModelSpec::bare(KIND),
            total,
            batch_size,
            deadline: Instant::now() + Duration::from_secs(60),
            seed: 7,
        };
        let _ = scheduler.handle(Event::Submit { request, reply });
        outcome
    }

    fn dispatched(cmds: &mut UnboundedReceiver<LinkCmd>) -> NetworkTask {
        match cmds.try_recv() {
            Ok(LinkCmd::Dispatch { task, .. }) => task,
            other => panic!("expected a dispatch, got {other:?}"),
        }
    }

    fn answer(task: &NetworkTask) -> Vec<ComputationResult> {
        task.replicas()
            .map(|r| ComputationResult::completed(r, Trajectory::default(), Duration::ZERO))
            .collect()
    }

    #[tokio::test]
    async fn measured_faster_slave_gets_the_larger_batch() {
        let mut scheduler = scheduler().await;
        let mut slow = join(&mut scheduler, 0, "slow");
        let mut fast = join(&mut scheduler, 1, "fast");
        let _outcome = submit(&mut scheduler, 40, 10);

        scheduler.schedule();
        let first_slow = dispatched(&mut slow);
        let first_fast = dispatched(&mut fast);
        assert_eq!((first_slow.len(), first_fast.len()), (10, 10));

        for (slave, task, elapsed) in [
            (0, &first_slow, Duration::from_secs(1)),
            (1, &first_fast, Duration::from_millis(100)),
        ] {
            let _ = scheduler.handle(Event::Completed {
                slave,
                batch: task.batch,
                results: answer(task),
                elapsed,
            });
        }
        scheduler.schedule();

        let second_slow = dispatched(&mut slow);
        let second_fast = dispatched(&mut fast);
        assert!(second_fast.len() > second_slow.len());
        assert_eq!((second_slow.len(), second_fast.len()), (2, 10));
    }

    #[tokio::test]
    async fn run_ends_once_every_able_slave_refused_the_model() {
        let mut scheduler = scheduler().await;
        let mut a = join(&mut scheduler, 0, "a");
        let mut b = join(&mut scheduler, 1, "b");
        let mut outcome = submit(&mut scheduler, 4, 4);

        scheduler.schedule();
        let (to_a, to_b) = (dispatched(&mut a), dispatched(&mut b));

        let _ = scheduler.handle(Event::Rejected {
            slave: 0,
            batch: to_a.batch,
            reason: "negative rate".into(),
        });
        scheduler.schedule();
        assert!(a.try_recv().is_err());
        assert!(outcome.try_recv().is_err());

        let _ = scheduler.handle(Event::Rejected {
            slave: 1,
            batch: to_b.batch,
            reason: "negative rate".into(),
        });
        scheduler.schedule();
        assert_eq!(
            outcome.try_recv().unwrap(),
            RunOutcome::ModelRejected {
                reason: "negative rate".into(),
                partial: Vec::new(),
                missing: vec![0, 1, 2, 3],
            }
        );
        assert_eq!(scheduler.registry.idle_for(KIND).len(), 2);

        let _next = submit(&mut scheduler, 4, 4);
        scheduler.schedule();
        assert_eq!(dispatched(&mut a).len(), 2);
        assert_eq!(dispatched(&mut b).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn announcements_are_consumed_by_joins_or_forgotten() {
        let mut scheduler = scheduler().await;
        let from: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let _ = scheduler.handle(Event::Announced {
            identity: info("a").identity(),
            from,
        });
        let _ = scheduler.handle(Event::Announced {
            identity: info("never_joins").identity(),
            from: "127.0.0.1:9101".parse().unwrap(),
        });

        let _cmds = join(&mut scheduler, 0, "a");
        assert_eq!(scheduler.registry.get(0).and_then(|e| e.probe), Some(from));
        assert_eq!(scheduler.announced.len(), 1);

        time::advance(Duration::from_secs(6)).await;
        scheduler.probe();
        assert!(scheduler.announced.is_empty());
    }
}
