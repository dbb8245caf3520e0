use serde::{Deserialize, Serialize};

use crate::specs::{
    model::ModelSpec,
    network::{NetworkInfo, ServerInfo},
    task::{NetworkTask, ResultBatch},
};

/// Commands the master sends to a slave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterCommand {
    /// Installs the model the following batches will run.
    Init(ModelSpec),
    Ping,
    CloseConnection,
}

/// Commands a slave sends to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveCommand {
    Pong,
    InitResponse,
    CloseConnection,
}

/// The application layer message for the entire system, both over
/// the discovery datagrams and the task channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msg {
    Master(MasterCommand),
    Slave(SlaveCommand),
    /// A slave making itself known to a master's discovery endpoint.
    Announce(ServerInfo),
    /// The task endpoint an announced slave should connect to.
    Connect(NetworkInfo),
    /// A slave's identity, first message on every task channel.
    Hello(ServerInfo),
    Task(NetworkTask),
    Results(ResultBatch),
    Err(String),
}

impl Msg {
    /// A short name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Master(MasterCommand::Init(_)) => "init",
            Msg::Master(MasterCommand::Ping) => "ping",
            Msg::Master(MasterCommand::CloseConnection) => "master_close_connection",
            Msg::Slave(SlaveCommand::Pong) => "pong",
            Msg::Slave(SlaveCommand::InitResponse) => "init_response",
            Msg::Slave(SlaveCommand::CloseConnection) => "slave_close_connection",
            Msg::Announce(_) => "announce",
            Msg::Connect(_) => "connect",
            Msg::Hello(_) => "hello",
            Msg::Task(_) => "task",
            Msg::Results(_) => "results",
            Msg::Err(_) => "err",
        }
    }
}
