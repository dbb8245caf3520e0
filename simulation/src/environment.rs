use std::{num::NonZeroUsize, sync::Arc, thread};

use comms::specs::task::{ComputationResult, NetworkTask};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{Model, Result, SimulationErr, run_task};

/// Runs a batch of tasks, producing one result per task in task order.
pub trait ExecutionEnvironment: Send + Sync {
    /// Runs every task of `batch` and blocks until all of them finished.
    ///
    /// # Args
    /// * `model` - The model every task simulates.
    /// * `batch` - The tasks to run.
    ///
    /// # Returns
    /// The results, positionally matching `batch.tasks`.
    fn run(&self, model: &dyn Model, batch: &NetworkTask) -> Vec<ComputationResult>;

    /// How many tasks can run at once.
    fn threads(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Runs the tasks one after the other on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl ExecutionEnvironment for Sequential {
    fn run(&self, model: &dyn Model, batch: &NetworkTask) -> Vec<ComputationResult> {
        batch.tasks.iter().map(|task| run_task(model, task)).collect()
    }

    fn threads(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Runs the tasks on a fixed size pool owned by this environment.
pub struct Parallel {
    pool: ThreadPool,
}

impl Parallel {
    /// Builds the environment and its pool.
    ///
    /// # Args
    /// * `threads` - The pool size.
    ///
    /// # Errors
    /// Returns `SimulationErr::Pool` if the os refuses to spawn the threads.
    pub fn new(threads: NonZeroUsize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.get())
            .thread_name(|i| format!("replica-{i}"))
            .build()
            .map_err(|e| SimulationErr::Pool(e.to_string()))?;

        Ok(Self { pool })
    }
}

impl ExecutionEnvironment for Parallel {
    fn run(&self, model: &dyn Model, batch: &NetworkTask) -> Vec<ComputationResult> {
        // indexed collect keeps submission order whatever the completion order
        self.pool.install(|| {
            batch
                .tasks
                .par_iter()
                .with_max_len(1)
                .map(|task| run_task(model, task))
                .collect()
        })
    }

    fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

/// Selects the execution environment a slave builds for each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Sequential,
    Parallel { threads: NonZeroUsize },
}

impl Default for ExecutorKind {
    fn default() -> Self {
        let threads = thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        ExecutorKind::Parallel { threads }
    }
}

impl ExecutorKind {
    /// Builds a fresh environment, pools are never shared between builds.
    pub fn build(&self) -> Result<Arc<dyn ExecutionEnvironment>> {
        Ok(match *self {
            ExecutorKind::Sequential => Arc::new(Sequential),
            ExecutorKind::Parallel { threads } => Arc::new(Parallel::new(threads)?),
        })
    }

    pub fn threads(&self) -> usize {
        match self {
            ExecutorKind::Sequential => 1,
            ExecutorKind::Parallel { threads } => threads.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use comms::specs::task::{SimulationTask, TaskOutcome, Trajectory};
    use rand::{Rng, rngs::StdRng};

    use super::*;

    /// Sleeps a seed dependent time so completion order is shuffled.
    struct Jittery;

    impl Model for Jittery {
        fn simulate(&self, rng: &mut StdRng) -> Result<Trajectory> {
            let ms = rng.random_range(0..12);
            thread::sleep(Duration::from_millis(ms));

            let mut t = Trajectory::default();
            t.push(ms as f64, vec![rng.random::<f64>()]);
            Ok(t)
        }
    }

    struct PanicsOnOdd;

    impl Model for PanicsOnOdd {
        fn simulate(&self, rng: &mut StdRng) -> Result<Trajectory> {
            if rng.random::<u32>() % 2 == 1 {
                panic!("odd draw");
            }
            Ok(Trajectory::default())
        }
    }

    fn batch(n: usize, salt: u64) -> NetworkTask {
        let tasks = (0..n)
            .map(|i| SimulationTask::new(i * 3 + 1, salt.wrapping_mul(977).wrapping_add(i as u64)))
            .collect();
        NetworkTask::new(salt, tasks)
    }

    #[test]
    fn parallel_results_keep_input_order_for_any_completion_order() {
        let parallel = Parallel::new(NonZeroUsize::new(4).unwrap()).unwrap();

        for salt in 0..5 {
            let batch = batch(24, salt);
            let results = parallel.run(&Jittery, &batch);

            let replicas: Vec<_> = results.iter().map(|r| r.replica).collect();
            assert_eq!(replicas, batch.replicas().collect::<Vec<_>>());
            let trajectories = |rs: &[ComputationResult]| {
                rs.iter().map(|r| r.trajectory().cloned()).collect::<Vec<_>>()
            };
            assert_eq!(
                trajectories(&results),
                trajectories(&Sequential.run(&Jittery, &batch))
            );
        }
    }

    #[test]
    fn faults_are_accounted_for_in_their_slot() {
        let parallel = Parallel::new(NonZeroUsize::new(3).unwrap()).unwrap();
        let batch = batch(16, 9);

        let results = parallel.run(&PanicsOnOdd, &batch);
        assert_eq!(results.len(), batch.len());

        let sequential = Sequential.run(&PanicsOnOdd, &batch);
        for (p, s) in results.iter().zip(&sequential) {
            assert_eq!(p.replica, s.replica);
            assert_eq!(p.is_completed(), s.is_completed());
        }
        assert!(results.iter().any(|r| matches!(r.outcome, TaskOutcome::Failed(_))));
    }

    #[test]
    fn empty_batches_yield_no_results() {
        let empty = NetworkTask::new(0, Vec::new());
        assert!(Sequential.run(&Jittery, &empty).is_empty());

        let parallel = ExecutorKind::Parallel {
            threads: NonZeroUsize::new(2).unwrap(),
        }
        .build()
        .unwrap();
        assert!(parallel.run(&Jittery, &empty).is_empty());
        assert_eq!(parallel.threads(), 2);
    }
}
