use std::{
    env, fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use comms::{
    ChannelOptions, CodecKind, Compression, Transport, specs::network::ChannelKind,
    tls::TlsPaths,
};
use serde::Deserialize;

/// Everything a master process is configured with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// The address the master binds and hands out to slaves.
    pub host: IpAddr,
    pub discovery_port: u16,
    pub task_port: u16,
    pub channel: ChannelKind,
    pub codec: CodecKind,
    pub compression: bool,
    pub batch_size: usize,
    /// How long a dispatched batch may take before its slave is evicted.
    pub batch_timeout_ms: u64,
    pub probe_interval_ms: u64,
    /// How long a discovered slave may stay silent before it is evicted.
    pub liveness_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub tls: Option<TlsPaths>,
    pub server_name: String,
    /// Slaves listening for masters to dial them.
    pub slaves: Vec<SocketAddr>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            discovery_port: 7000,
            task_port: 7001,
            channel: ChannelKind::Plain,
            codec: CodecKind::Json,
            compression: false,
            batch_size: 64,
            batch_timeout_ms: 60_000,
            probe_interval_ms: 5_000,
            liveness_timeout_ms: 15_000,
            handshake_timeout_ms: 5_000,
            tls: None,
            server_name: "localhost".into(),
            slaves: Vec::new(),
        }
    }
}

impl MasterConfig {
    /// Loads the json file named by `CONFIG`, if any, then applies the
    /// `HOST`, `DISCOVERY_PORT`, `TASK_PORT` and `BATCH_SIZE` overrides.
    pub fn from_env() -> io::Result<Self> {
        let mut config: Self = match env::var("CONFIG") {
            Ok(path) => serde_json::from_slice(&fs::read(path)?).map_err(io::Error::other)?,
            Err(_) => Self::default(),
        };

        if let Some(host) = parsed("HOST")? {
            config.host = host;
        }
        if let Some(port) = parsed("DISCOVERY_PORT")? {
            config.discovery_port = port;
        }
        if let Some(port) = parsed("TASK_PORT")? {
            config.task_port = port;
        }
        if let Some(size) = parsed("BATCH_SIZE")? {
            config.batch_size = size;
        }

        Ok(config)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
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

pub(crate) fn parsed<T: FromStr>(name: &str) -> io::Result<Option<T>> {
    match env::var(name) {
        Ok(v) => v.parse().map(Some).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {name}: {v}"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_only_what_it_names() {
        let config: MasterConfig = serde_json::from_str(
            r#"{
                "channel": "secure",
                "tls": { "cert": "node.pem", "key": "node.key", "ca": "ca.pem" },
                "batch_timeout_ms": 250,
                "slaves": ["10.0.0.2:7100", "10.0.0.3:7100"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.channel, ChannelKind::Secure);
        assert_eq!(config.batch_timeout(), Duration::from_millis(250));
        assert_eq!(config.slaves.len(), 2);
        assert_eq!(config.discovery_port, MasterConfig::default().discovery_port);
        assert_eq!(config.channel_options().compression, Compression::None);
    }
}
