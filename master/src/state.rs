use std::{collections::BTreeMap, time::SystemTime};

use serde::Serialize;

use crate::registry::SlaveStatus;

/// A read-only view of one registered slave.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaveSnapshot {
    pub status: SlaveStatus,
    /// Replicas currently out on this slave.
    pub load: usize,
    pub last_seen: SystemTime,
    /// The last observed tasks per second, if the slave finished a batch.
    pub throughput: Option<f64>,
}

/// A consistent snapshot of the master, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MasterState {
    /// Registered slaves by identity.
    pub slaves: BTreeMap<String, SlaveSnapshot>,
    /// Replicas of the current run waiting for a slave.
    pub pending: usize,
    /// Batches dispatched and not yet answered.
    pub in_flight: usize,
    /// Replicas of the current run already merged.
    pub merged: usize,
    /// Runs finished since start.
    pub runs: u64,
}
