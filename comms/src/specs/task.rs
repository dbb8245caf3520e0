use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One replica to run: its index in the job and its random seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationTask {
    pub replica: usize,
    pub seed: u64,
}

impl SimulationTask {
    pub fn new(replica: usize, seed: u64) -> Self {
        Self { replica, seed }
    }
}

/// The ordered group of tasks shipped to one slave in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTask {
    pub batch: u64,
    pub tasks: Vec<SimulationTask>,
}

impl NetworkTask {
    pub fn new(batch: u64, tasks: Vec<SimulationTask>) -> Self {
        Self { batch, tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn replicas(&self) -> impl Iterator<Item = usize> + '_ {
        self.tasks.iter().map(|t| t.replica)
    }
}

/// A point of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub state: Vec<f64>,
}

impl Sample {
    pub fn new(time: f64, state: Vec<f64>) -> Self {
        Self { time, state }
    }
}

/// The sequence of states a replica went through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub samples: Vec<Sample>,
}

impl Trajectory {
    pub fn push(&mut self, time: f64, state: Vec<f64>) {
        self.samples.push(Sample::new(time, state));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

impl From<Vec<Sample>> for Trajectory {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(Trajectory),
    /// The task faulted, the reason is kept in its result slot.
    Failed(String),
}

/// The result of running one `SimulationTask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationResult {
    pub replica: usize,
    pub elapsed: Duration,
    pub outcome: TaskOutcome,
}

impl ComputationResult {
    pub fn completed(replica: usize, trajectory: Trajectory, elapsed: Duration) -> Self {
        Self {
            replica,
            elapsed,
            outcome: TaskOutcome::Completed(trajectory),
        }
    }

    pub fn failed(replica: usize, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            replica,
            elapsed,
            outcome: TaskOutcome::Failed(reason.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed(_))
    }

    pub fn trajectory(&self) -> Option<&Trajectory> {
        match &self.outcome {
            TaskOutcome::Completed(t) => Some(t),
            TaskOutcome::Failed(_) => None,
        }
    }
}

/// The results of one `NetworkTask`, in task order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
    pub batch: u64,
    pub results: Vec<ComputationResult>,
}
