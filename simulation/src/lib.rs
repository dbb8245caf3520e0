mod benchmark;
mod environment;
mod error;
mod execute;
mod model;
pub mod models;
mod registry;

pub use benchmark::{BatchMeasurement, Benchmark, BenchmarkReport};
pub use environment::{ExecutionEnvironment, ExecutorKind, Parallel, Sequential};
pub use error::{Result, SimulationErr};
pub use execute::run_task;
pub use model::Model;
pub use registry::ModelRegistry;
