use std::{
    net::SocketAddr,
    time::{Duration, SystemTime},
};

use comms::specs::network::ServerInfo;
use serde::Serialize;
use tokio::time::Instant;

use crate::{link::Link, partition::Candidate, state::SlaveSnapshot};

/// Registry-assigned id of a slave connection.
pub type SlaveId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveStatus {
    Idle,
    Busy,
}

pub(crate) struct SlaveEntry {
    pub id: SlaveId,
    pub info: ServerInfo,
    pub status: SlaveStatus,
    pub load: usize,
    pub throughput: Option<f64>,
    pub last_seen: Instant,
    /// Where the slave answers keep-alive probes, known once it announced.
    pub probe: Option<SocketAddr>,
    pub link: Link,
}

impl SlaveEntry {
    pub fn new(id: SlaveId, info: ServerInfo, link: Link, probe: Option<SocketAddr>) -> Self {
        Self {
            id,
            info,
            status: SlaveStatus::Idle,
            load: 0,
            throughput: None,
            last_seen: Instant::now(),
            probe,
            link,
        }
    }

    fn snapshot(&self, now: Instant, wall: SystemTime) -> SlaveSnapshot {
        SlaveSnapshot {
            status: self.status,
            load: self.load,
            last_seen: wall
                .checked_sub(now.saturating_duration_since(self.last_seen))
                .unwrap_or(wall),
            throughput: self.throughput,
        }
    }
}

/// The slaves the master may dispatch to, in registration order.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<SlaveEntry>,
}

impl Registry {
    pub fn insert(&mut self, entry: SlaveEntry) {
        self.entries.push(entry);
    }

    pub fn remove(&mut self, id: SlaveId) -> Option<SlaveEntry> {
        let at = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(at))
    }

    pub fn get(&self, id: SlaveId) -> Option<&SlaveEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn by_identity(&self, identity: &str) -> Option<SlaveId> {
        self.entries
            .iter()
            .find(|e| e.info.identity() == identity)
            .map(|e| e.id)
    }

    /// Refreshes every slave probed at `addr`.
    pub fn seen_at(&mut self, addr: SocketAddr) -> bool {
        let now = Instant::now();
        let mut found = false;

        for entry in self.entries.iter_mut().filter(|e| e.probe == Some(addr)) {
            entry.last_seen = now;
            found = true;
        }

        found
    }

    pub fn set_probe(&mut self, id: SlaveId, addr: SocketAddr) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.probe = Some(addr);
            entry.last_seen = Instant::now();
        }
    }

    /// Idle slaves able to run `kind`, in registration order.
    pub fn idle_for(&self, kind: &str) -> Vec<Candidate> {
        self.entries
            .iter()
            .filter(|e| e.status == SlaveStatus::Idle && e.info.supports(kind))
            .map(|e| Candidate::new(e.id, e.throughput))
            .collect()
    }

    /// Every slave able to run `kind`, busy or not.
    pub fn able_to_run<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = SlaveId> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.info.supports(kind))
            .map(|e| e.id)
    }

    pub fn mark_busy(&mut self, id: SlaveId, load: usize) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.status = SlaveStatus::Busy;
            entry.load = load;
        }
    }

    /// Marks a slave idle after it answered a batch of `tasks` in `elapsed`.
    pub fn mark_idle(&mut self, id: SlaveId, tasks: usize, elapsed: Duration) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };

        entry.status = SlaveStatus::Idle;
        entry.load = 0;
        entry.last_seen = Instant::now();
        if tasks > 0 {
            let secs = elapsed.as_secs_f64().max(1e-6);
            entry.throughput = Some(tasks as f64 / secs);
        }

        true
    }

    /// Slaves with a probe address that stayed silent longer than `timeout`.
    pub fn silent(&self, now: Instant, timeout: Duration) -> Vec<SlaveId> {
        self.entries
            .iter()
            .filter(|e| e.probe.is_some() && now.saturating_duration_since(e.last_seen) > timeout)
            .map(|e| e.id)
            .collect()
    }

    pub fn probes(&self) -> Vec<SocketAddr> {
        self.entries.iter().filter_map(|e| e.probe).collect()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = SlaveEntry> + '_ {
        self.entries.drain(..)
    }

    pub fn snapshots(&self) -> impl Iterator<Item = (String, SlaveSnapshot)> + '_ {
        let now = Instant::now();
        let wall = SystemTime::now();
        self.entries
            .iter()
            .map(move |e| (e.info.identity(), e.snapshot(now, wall)))
    }
}
