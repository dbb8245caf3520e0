use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use serde::{Deserialize, Serialize};

/// The transport variant an endpoint speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Plain,
    Secure,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Plain => write!(f, "plain"),
            ChannelKind::Secure => write!(f, "secure"),
        }
    }
}

/// Identifies one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub address: IpAddr,
    pub port: u16,
    pub kind: ChannelKind,
}

impl NetworkInfo {
    pub fn new(addr: SocketAddr, kind: ChannelKind) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
            kind,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.socket_addr())
    }
}

/// What a slave advertises about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub network: NetworkInfo,
    /// The model kinds this slave can execute.
    pub models: Vec<String>,
    pub threads: usize,
}

impl ServerInfo {
    pub fn supports(&self, kind: &str) -> bool {
        self.models.iter().any(|m| m == kind)
    }

    /// The key a master registers this slave under.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.name, self.network)
    }
}
