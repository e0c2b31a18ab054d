//! Masters registry: the replicated set of supervised master addresses.
//!
//! Every node materializes the set by feeding committed [`Command`]s through
//! [`MastersState::reduce`]; reads never touch the log. Mutations are
//! proposed through consensus and only by the leader.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{Error, Result, METRICS};
use crate::consensus::{Command, Consensus, StateMachine};
use crate::store::split_host_port;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members {
    pub masters: BTreeSet<String>,
    pub seeded: bool,
}

impl Members {
    /// Deterministic reducer applied identically on every node.
    pub fn reduce(mut self, command: &Command) -> Self {
        match command {
            Command::Seed(addrs) => {
                if !self.seeded {
                    self.masters.extend(addrs.iter().cloned());
                    self.seeded = true;
                }
            }
            Command::AddMasters(addrs) => {
                self.masters.extend(addrs.iter().cloned());
                self.seeded = true;
            }
            Command::RemoveMasters(addrs) => {
                for addr in addrs {
                    self.masters.remove(addr);
                }
                self.seeded = true;
            }
            Command::Promote { old, new } => {
                self.masters.remove(old);
                self.masters.insert(new.clone());
            }
            Command::Barrier { .. } => {}
        }
        self
    }
}

/// Local materialized view of the registry; the consensus state machine.
#[derive(Debug, Default)]
pub struct MastersState {
    members: RwLock<Members>,
}

impl MastersState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn masters(&self) -> Vec<String> {
        self.members.read().masters.iter().cloned().collect()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.members.read().masters.contains(addr)
    }

    pub fn is_seeded(&self) -> bool {
        self.members.read().seeded
    }
}

impl StateMachine for MastersState {
    fn apply(&self, command: &Command) {
        let mut members = self.members.write();
        *members = std::mem::take(&mut *members).reduce(command);
        METRICS.supervised_masters.set(members.masters.len() as u64);
    }
}

pub struct MastersRegistry {
    state: Arc<MastersState>,
    consensus: Arc<dyn Consensus>,
}

impl MastersRegistry {
    pub fn new(state: Arc<MastersState>, consensus: Arc<dyn Consensus>) -> Self {
        Self { state, consensus }
    }

    /// Last-applied local view, ordered. Call [`MastersRegistry::barrier`]
    /// first when the read must reflect every committed mutation.
    pub fn get_masters(&self) -> Vec<String> {
        self.state.masters()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.state.contains(addr)
    }

    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    pub async fn barrier(&self, timeout: Duration) -> Result<()> {
        self.consensus.barrier(timeout).await
    }

    /// Propose the configured seed set; a no-op once the registry was seeded.
    pub async fn seed(&self, addrs: &[String]) -> Result<()> {
        if addrs.is_empty() || self.state.is_seeded() {
            return Ok(());
        }
        self.ensure_leader()?;
        self.consensus.apply(Command::Seed(addrs.to_vec())).await
    }

    /// Add the addresses not already supervised. Every address must be
    /// `host:port`.
    pub async fn add_masters(&self, addrs: &[String]) -> Result<()> {
        for addr in addrs {
            split_host_port(addr)?;
        }
        self.ensure_leader()?;
        let current = self.state.masters();
        let mut delta: Vec<String> = Vec::new();
        for addr in addrs {
            if !current.contains(addr) && !delta.contains(addr) {
                delta.push(addr.clone());
            }
        }
        if delta.is_empty() {
            return Ok(());
        }
        tracing::info!(masters = ?delta, "Adding masters");
        self.consensus.apply(Command::AddMasters(delta)).await
    }

    /// Remove the addresses currently supervised.
    pub async fn remove_masters(&self, addrs: &[String]) -> Result<()> {
        self.ensure_leader()?;
        let current = self.state.masters();
        let mut delta: Vec<String> = Vec::new();
        for addr in addrs {
            if current.contains(addr) && !delta.contains(addr) {
                delta.push(addr.clone());
            }
        }
        if delta.is_empty() {
            return Ok(());
        }
        tracing::info!(masters = ?delta, "Removing masters");
        self.consensus.apply(Command::RemoveMasters(delta)).await
    }

    /// Replace `old` with `new` in a single replicated mutation.
    pub async fn promote(&self, old: &str, new: &str) -> Result<()> {
        self.ensure_leader()?;
        self.consensus
            .apply(Command::Promote {
                old: old.to_string(),
                new: new.to_string(),
            })
            .await
    }

    fn ensure_leader(&self) -> Result<()> {
        if self.consensus.is_leader() {
            Ok(())
        } else {
            Err(Error::NotLeader("unknown".to_string()))
        }
    }
}
