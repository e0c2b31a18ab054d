//! Single-process consensus: the local node is the whole cluster.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{Command, Consensus, StateMachine};
use crate::common::{Error, Result};

pub struct StandaloneConsensus {
    fsm: Arc<dyn StateMachine>,
    leader_tx: watch::Sender<bool>,
}

impl StandaloneConsensus {
    pub fn new(fsm: Arc<dyn StateMachine>) -> Self {
        let (leader_tx, _) = watch::channel(true);
        Self { fsm, leader_tx }
    }
}

#[async_trait]
impl Consensus for StandaloneConsensus {
    fn leader_notifications(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    async fn apply(&self, command: Command) -> Result<()> {
        if !self.is_leader() {
            return Err(Error::NotLeader("none".to_string()));
        }
        self.fsm.apply(&command);
        Ok(())
    }

    async fn barrier(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) {
        self.leader_tx.send_replace(false);
    }
}
