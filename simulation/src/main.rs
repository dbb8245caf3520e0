use std::{env, fs::File, io, num::NonZeroUsize, str::FromStr};

use comms::specs::model::ModelSpec;
use log::info;
use simulation::{Benchmark, ExecutorKind, ModelRegistry, models::BirthDeath};

fn var<T: FromStr>(name: &str, default: T) -> io::Result<T> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {name}: {v}"))),
        Err(_) => Ok(default),
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let batch_size = var("BATCH_SIZE", 64usize)?;
    let repetitions = var("REPETITIONS", 10usize)?;
    let seed = var("SEED", 0u64)?;
    let threads = var("THREADS", 0usize)?;

    let executor = match NonZeroUsize::new(threads) {
        Some(threads) => ExecutorKind::Parallel { threads },
        None if env::var("EXECUTOR").as_deref() == Ok("sequential") => ExecutorKind::Sequential,
        None => ExecutorKind::default(),
    };

    let spec = match env::var("MODEL") {
        Ok(json) => serde_json::from_str::<BirthDeath>(&json)
            .and_then(|params| ModelSpec::new(BirthDeath::KIND, &params))
            .map_err(io::Error::other)?,
        Err(_) => ModelSpec::bare(BirthDeath::KIND),
    };

    let model = ModelRegistry::with_builtins()
        .resolve(&spec)
        .map_err(io::Error::other)?;
    let environment = executor.build().map_err(io::Error::other)?;

    info!(
        environment = environment.name(), threads = environment.threads();
        "benchmarking {repetitions} batches of {batch_size} replicas"
    );

    let report = Benchmark::new(model.as_ref(), environment.as_ref(), seed).run(batch_size, repetitions);
    info!("mean throughput {:.2} tasks/s", report.mean_throughput());

    match env::var("OUTPUT") {
        Ok(path) => report.write_csv(File::create(path)?),
        Err(_) => report.write_csv(io::stdout().lock()),
    }
}
