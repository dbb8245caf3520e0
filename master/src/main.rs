use std::{env, fs::File, io::BufWriter, time::Duration};

use anyhow::Context;
use comms::specs::model::ModelSpec;
use log::{info, warn};
use master::{Master, MasterConfig, RunOutcome};
use simulation::models::BirthDeath;

fn var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match env::var(name) {
        Ok(v) => v.parse().ok().with_context(|| format!("invalid {name}: {v}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = MasterConfig::from_env().context("loading the master configuration")?;
    let replicas = var("REPLICAS", 100usize)?;
    let min_slaves = var("MIN_SLAVES", 1usize)?;
    let deadline = Duration::from_millis(var("RUN_DEADLINE_MS", 600_000u64)?);
    let seed = var("SEED", rand::random::<u64>())?;

    let model = match env::var("MODEL") {
        Ok(json) => {
            let params: BirthDeath = serde_json::from_str(&json).context("parsing MODEL")?;
            ModelSpec::new(BirthDeath::KIND, &params)?
        }
        Err(_) => ModelSpec::bare(BirthDeath::KIND),
    };

    let transport = config.transport()?;
    let master = Master::start(config.clone(), transport).await?;

    for addr in &config.slaves {
        if let Err(e) = master.connect(*addr).await {
            warn!("could not reach slave at {addr}: {e}");
        }
    }

    info!("waiting for {min_slaves} slaves");
    let outcome = tokio::select! {
        res = async {
            master.wait_for_slaves(min_slaves).await?;
            master
                .run_seeded(model, replicas, config.batch_size, deadline, seed)
                .await
        } => Some(res?),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(outcome) = outcome else {
        info!("interrupted");
        master.shutdown().await;
        return Ok(());
    };

    let results = match outcome {
        RunOutcome::Completed(results) => results,
        RunOutcome::DeadlineExceeded { partial, missing } => {
            warn!("deadline exceeded, {} replicas missing", missing.len());
            partial
        }
        RunOutcome::ModelRejected { reason, .. } => {
            master.shutdown().await;
            anyhow::bail!("no slave could build the model: {reason}");
        }
    };
    info!(seed = seed; "collected {} results", results.len());

    if let Ok(path) = env::var("OUTPUT") {
        let file = File::create(&path).with_context(|| format!("creating {path}"))?;
        serde_json::to_writer(BufWriter::new(file), &results)?;
    }

    master.shutdown().await;
    Ok(())
}
