use std::io;

use log::info;
use simulation::ModelRegistry;
use slave::{Slave, SlaveConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = SlaveConfig::from_env()?;
    let transport = config.transport()?;

    let slave = Slave::bind(config, transport, ModelRegistry::with_builtins()).await?;
    info!("discovery endpoint {}", slave.info().network);
    if let Some(addr) = slave.listen_addr() {
        info!("accepting masters at {addr}");
    }

    let shutdown = CancellationToken::new();
    let run = slave.run(shutdown.clone());
    tokio::pin!(run);

    tokio::select! {
        ret = &mut run => return Ok(ret?),
        _ = signal::ctrl_c() => info!("received SIGTERM"),
    }

    shutdown.cancel();
    run.await?;
    Ok(())
}
