//! Group model: one monitored master and its replicas

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replication link state of a replica, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Syncing,
    Connected,
}

impl LinkState {
    /// Map a Redis `ROLE` link state string.
    pub fn from_redis(state: &str) -> Self {
        match state {
            "connected" => LinkState::Connected,
            "sync" => LinkState::Syncing,
            "connect" | "connecting" | "handshake" => LinkState::Connecting,
            _ => LinkState::Disconnected,
        }
    }

    /// Connected or syncing replicas are preferred promotion candidates.
    pub fn is_live(&self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Syncing)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Syncing => write!(f, "syncing"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub address: String,
    pub offset: u64,
    pub state: LinkState,
}

impl Replica {
    pub fn new(address: impl Into<String>, offset: u64, state: LinkState) -> Self {
        Self {
            address: address.into(),
            offset,
            state,
        }
    }
}

/// Snapshot of one master/replica topology, re-derived from a live probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub master: String,
    /// 0 when unknown
    pub master_offset: u64,
    /// Never contains the master itself
    pub replicas: Vec<Replica>,
}

impl Group {
    pub fn new(master: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            master_offset: 0,
            replicas: Vec::new(),
        }
    }

    /// Build a group from a probe, dropping any replica entry that names the
    /// master and keeping the first entry for duplicated addresses.
    pub fn with_replicas(master: impl Into<String>, master_offset: u64, replicas: Vec<Replica>) -> Self {
        let mut group = Self::new(master);
        group.master_offset = master_offset;
        for replica in replicas {
            if replica.address == group.master || group.replica(&replica.address).is_some() {
                continue;
            }
            group.replicas.push(replica);
        }
        group
    }

    pub fn replica(&self, address: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.address == address)
    }

    /// True once every replica has caught up with the master offset.
    pub fn is_synced(&self) -> bool {
        self.master_offset > 0 && self.replicas.iter().all(|r| r.offset == self.master_offset)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [", self.master, self.master_offset)?;
        for (i, r) in self.replicas.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}({})", r.address, r.offset, r.state)?;
        }
        write!(f, "]")
    }
}
