use std::{
    io::{self, Write},
    time::{Duration, Instant},
};

use comms::specs::task::{ComputationResult, NetworkTask, SimulationTask};
use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{ExecutionEnvironment, Model};

/// The elapsed time of one benchmarked batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchMeasurement {
    pub batch_size: usize,
    pub elapsed: Duration,
}

impl BatchMeasurement {
    /// Tasks per second achieved by the batch.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.batch_size as f64 / secs
        } else {
            f64::INFINITY
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub environment: &'static str,
    pub measurements: Vec<BatchMeasurement>,
    pub results: Vec<ComputationResult>,
}

impl BenchmarkReport {
    /// Writes one csv row per batch, after a header.
    pub fn write_csv<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "environment,batch_size,elapsed_ms,tasks_per_sec")?;
        for m in &self.measurements {
            writeln!(
                w,
                "{},{},{:.3},{:.3}",
                self.environment,
                m.batch_size,
                m.elapsed.as_secs_f64() * 1e3,
                m.throughput()
            )?;
        }
        w.flush()
    }

    pub fn mean_throughput(&self) -> f64 {
        let tasks: usize = self.measurements.iter().map(|m| m.batch_size).sum();
        let secs: f64 = self.measurements.iter().map(|m| m.elapsed.as_secs_f64()).sum();
        if secs > 0.0 { tasks as f64 / secs } else { 0.0 }
    }
}

/// Measures an execution environment by running repeated batches through it.
pub struct Benchmark<'a> {
    model: &'a dyn Model,
    environment: &'a dyn ExecutionEnvironment,
    seed: u64,
}

impl<'a> Benchmark<'a> {
    /// Creates a new `Benchmark`.
    ///
    /// # Args
    /// * `model` - The model every task simulates.
    /// * `environment` - The strategy being measured.
    /// * `seed` - Seeds the task generator, equal seeds yield equal batches.
    pub fn new(model: &'a dyn Model, environment: &'a dyn ExecutionEnvironment, seed: u64) -> Self {
        Self {
            model,
            environment,
            seed,
        }
    }

    /// The batches `run` executes, in order.
    pub fn batches(&self, batch_size: usize, repetitions: usize) -> Vec<NetworkTask> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        (0..repetitions)
            .map(|rep| {
                let tasks = (0..batch_size)
                    .map(|i| SimulationTask::new(rep * batch_size + i, rng.random()))
                    .collect();
                NetworkTask::new(rep as u64, tasks)
            })
            .collect()
    }

    /// Runs `repetitions` batches of `batch_size` tasks, timing each.
    pub fn run(&self, batch_size: usize, repetitions: usize) -> BenchmarkReport {
        let mut measurements = Vec::with_capacity(repetitions);
        let mut results = Vec::with_capacity(batch_size * repetitions);

        for batch in self.batches(batch_size, repetitions) {
            let start = Instant::now();
            let batch_results = self.environment.run(self.model, &batch);
            let elapsed = start.elapsed();

            debug!(batch = batch.batch, elapsed_ms = elapsed.as_millis() as u64; "benchmarked batch");
            measurements.push(BatchMeasurement {
                batch_size: batch.len(),
                elapsed,
            });
            results.extend(batch_results);
        }

        BenchmarkReport {
            environment: self.environment.name(),
            measurements,
            results,
        }
    }
}
