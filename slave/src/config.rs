use std::{
    env, fs,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use comms::{
    ChannelOptions, CodecKind, Compression, Transport,
    specs::network::ChannelKind,
    tls::TlsPaths,
};
use serde::Deserialize;
use simulation::ExecutorKind;

/// Everything a slave process is configured with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlaveConfig {
    pub name: String,
    /// The address this slave binds and advertises.
    pub host: IpAddr,
    pub discovery_port: u16,
    /// Where to announce this slave, `None` disables announcing.
    pub master_discovery: Option<SocketAddr>,
    /// Accept masters dialing this port directly.
    pub listen_port: Option<u16>,
    pub channel: ChannelKind,
    pub codec: CodecKind,
    pub compression: bool,
    pub executor: ExecutorKind,
    pub announce_interval_ms: u64,
    pub tls: Option<TlsPaths>,
    pub server_name: String,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            name: "slave".into(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            discovery_port: 0,
            master_discovery: None,
            listen_port: None,
            channel: ChannelKind::Plain,
            codec: CodecKind::Json,
            compression: false,
            executor: ExecutorKind::default(),
            announce_interval_ms: 2_000,
            tls: None,
            server_name: "localhost".into(),
        }
    }
}

impl SlaveConfig {
    /// Loads the json file named by `CONFIG`, if any, then applies the
    /// `NAME`, `HOST`, `DISCOVERY_PORT`, `MASTER` and `LISTEN_PORT` overrides.
    pub fn from_env() -> io::Result<Self> {
        let mut config: Self = match env::var("CONFIG") {
            Ok(path) => serde_json::from_slice(&fs::read(path)?).map_err(io::Error::other)?,
            Err(_) => Self::default(),
        };

        if let Ok(name) = env::var("NAME") {
            config.name = name;
        }
        if let Some(host) = parsed("HOST")? {
            config.host = host;
        }
        if let Some(port) = parsed("DISCOVERY_PORT")? {
            config.discovery_port = port;
        }
        if let Some(master) = parsed("MASTER")? {
            config.master_discovery = Some(master);
        }
        if let Some(port) = parsed("LISTEN_PORT")? {
            config.listen_port = Some(port);
        }

        Ok(config)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms.max(1))
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            codec: self.codec,
            compression: Compression::from_flag(self.compression),
        }
    }

    pub fn transport(&self) -> comms::Result<Arc<dyn Transport>> {
        comms::build_transport(self.channel, self.tls.as_ref(), &self.server_name)
    }
}

fn parsed<T: FromStr>(name: &str) -> io::Result<Option<T>> {
    match env::var(name) {
        Ok(v) => v.parse().map(Some).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {name}: {v}"))
        }),
        Err(_) => Ok(None),
    }
}
