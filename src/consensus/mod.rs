//! Consensus membership
//!
//! Leadership notifications, replicated command application and a barrier
//! that waits until earlier commands are visible on a quorum. Two backends:
//! - [`StandaloneConsensus`]: single process, always leader
//! - [`RaftConsensus`]: raft cluster over an HTTP peer transport

pub mod raft_node;
pub mod standalone;
pub mod storage;
pub mod transport;

pub use raft_node::RaftConsensus;
pub use standalone::StandaloneConsensus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::common::{Config, Result};

/// A replicated registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Initial master set; ignored once the registry has been seeded.
    Seed(Vec<String>),
    AddMasters(Vec<String>),
    RemoveMasters(Vec<String>),
    /// Retire `old` and supervise `new` in one step.
    Promote { old: String, new: String },
    /// Marker proposed by [`Consensus::barrier`]; no registry effect.
    Barrier { node: u64, seq: u64 },
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Deterministic state machine fed with committed commands, in log order,
/// identically on every node.
pub trait StateMachine: Send + Sync {
    fn apply(&self, command: &Command);
}

#[async_trait]
pub trait Consensus: Send + Sync {
    /// Current local leadership, updated on every transition. Receivers may
    /// observe the same value more than once.
    fn leader_notifications(&self) -> watch::Receiver<bool>;

    fn is_leader(&self) -> bool;

    /// Propose `command`. Returns once the local node accepted the proposal,
    /// not once it is committed. Fails with `NotLeader` on a follower.
    async fn apply(&self, command: Command) -> Result<()>;

    /// Wait until every command this node applied earlier is committed on a
    /// quorum and applied locally.
    async fn barrier(&self, timeout: Duration) -> Result<()>;

    /// Stop background tasks and release listeners.
    async fn shutdown(&self);
}

/// Build the backend selected by `config.raft`.
pub async fn start(config: &Config, fsm: Arc<dyn StateMachine>) -> Result<Arc<dyn Consensus>> {
    if config.raft.is_standalone() {
        tracing::info!("No raft cluster configured, running standalone");
        Ok(Arc::new(StandaloneConsensus::new(fsm)))
    } else {
        Ok(Arc::new(RaftConsensus::start(&config.raft, fsm).await?))
    }
}
