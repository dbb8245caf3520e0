use std::collections::{BTreeSet, HashSet};

use comms::specs::{
    model::ModelSpec,
    task::{ComputationResult, SimulationTask},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::time::Instant;

use crate::registry::SlaveId;

pub(crate) type JobId = u64;

/// What a caller asked the master to run.
#[derive(Debug, Clone)]
pub(crate) struct JobRequest {
    pub model: ModelSpec,
    pub total: usize,
    pub batch_size: usize,
    pub deadline: Instant,
    pub seed: u64,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every replica, indexed by replica.
    Completed(Vec<ComputationResult>),
    /// The overall deadline passed first. `partial` holds the merged
    /// results in replica order and `missing` the replicas without one.
    DeadlineExceeded {
        partial: Vec<ComputationResult>,
        missing: Vec<usize>,
    },
    /// Every slave able to run the model failed to build it, `reason`
    /// being the last slave's answer.
    ModelRejected {
        reason: String,
        partial: Vec<ComputationResult>,
        missing: Vec<usize>,
    },
}

impl RunOutcome {
    pub fn into_results(self) -> Vec<ComputationResult> {
        match self {
            RunOutcome::Completed(results) => results,
            RunOutcome::DeadlineExceeded { partial, .. }
            | RunOutcome::ModelRejected { partial, .. } => partial,
        }
    }
}

/// The aggregate of one run: which replicas still wait for a slave and
/// which results were already merged.
///
/// Replicas leave `pending` when handed out and only come back through
/// `requeue`, so a replica is either pending, out in exactly one batch
/// or merged.
#[derive(Debug)]
pub(crate) struct Job {
    pub id: JobId,
    pub model: ModelSpec,
    pub batch_size: usize,
    pub deadline: Instant,
    seeds: Vec<u64>,
    pending: BTreeSet<usize>,
    results: Vec<Option<ComputationResult>>,
    merged: usize,
    /// Slaves that refused the model, skipped for the rest of this run.
    excluded: HashSet<SlaveId>,
    rejection: Option<String>,
}

impl Job {
    pub fn new(id: JobId, request: JobRequest) -> Self {
        let mut rng = StdRng::seed_from_u64(request.seed);
        let seeds = (0..request.total).map(|_| rng.random()).collect();

        Self {
            id,
            model: request.model,
            batch_size: request.batch_size,
            deadline: request.deadline,
            seeds,
            pending: (0..request.total).collect(),
            results: vec![None; request.total],
            merged: 0,
            excluded: HashSet::new(),
            rejection: None,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn merged(&self) -> usize {
        self.merged
    }

    pub fn is_complete(&self) -> bool {
        self.merged == self.total()
    }

    /// Hands out up to `count` pending replicas, lowest index first.
    pub fn take(&mut self, count: usize) -> Vec<SimulationTask> {
        let mut tasks = Vec::with_capacity(count.min(self.pending.len()));

        while tasks.len() < count {
            let Some(replica) = self.pending.pop_first() else {
                break;
            };
            tasks.push(SimulationTask::new(replica, self.seeds[replica]));
        }

        tasks
    }

    /// Returns replicas to the pending pool, skipping those already merged.
    pub fn requeue(&mut self, replicas: impl IntoIterator<Item = usize>) {
        for replica in replicas {
            if self.results.get(replica).is_some_and(Option::is_none) {
                self.pending.insert(replica);
            }
        }
    }

    /// Merges results into their slots. Results for replicas out of range
    /// or already merged are discarded.
    ///
    /// # Returns
    /// How many results were merged.
    pub fn merge(&mut self, results: impl IntoIterator<Item = ComputationResult>) -> usize {
        let mut accepted = 0;

        for result in results {
            let Some(slot) = self.results.get_mut(result.replica) else {
                continue;
            };
            if slot.is_none() {
                self.pending.remove(&result.replica);
                *slot = Some(result);
                accepted += 1;
            }
        }

        self.merged += accepted;
        accepted
    }

    /// Keeps `slave` out of this run after it could not build the model.
    pub fn exclude(&mut self, slave: SlaveId, reason: String) {
        self.excluded.insert(slave);
        self.rejection = Some(reason);
    }

    pub fn excludes(&self, slave: SlaveId) -> bool {
        self.excluded.contains(&slave)
    }

    /// The last rejection, if any slave refused the model.
    pub fn rejection(&self) -> Option<&str> {
        self.rejection.as_deref()
    }

    /// Ends the run because no remaining slave can build the model.
    pub fn into_rejected(mut self) -> RunOutcome {
        let reason = self.rejection.take().unwrap_or_default();
        let (partial, missing) = self.split();
        RunOutcome::ModelRejected {
            reason,
            partial,
            missing,
        }
    }

    pub fn into_outcome(self) -> RunOutcome {
        if self.is_complete() {
            return RunOutcome::Completed(self.results.into_iter().flatten().collect());
        }

        let (partial, missing) = self.split();
        RunOutcome::DeadlineExceeded { partial, missing }
    }

    /// Merged results in replica order and the replicas still without one.
    fn split(self) -> (Vec<ComputationResult>, Vec<usize>) {
        let mut partial = Vec::with_capacity(self.merged);
        let mut missing = Vec::with_capacity(self.total() - self.merged);

        for (replica, slot) in self.results.into_iter().enumerate() {
            match slot {
                Some(result) => partial.push(result),
                None => missing.push(replica),
            }
        }

        (partial, missing)
    }
}
