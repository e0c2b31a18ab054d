//! In-memory fakes of the store and consensus traits shared by the
//! integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use redis_failover::common::{Config, Error, Result};
use redis_failover::consensus::{Command, Consensus, StateMachine};
use redis_failover::store::{LinkState, Replica, Role, Store};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Simulated Redis endpoints keyed by address. Unknown addresses refuse
/// connections.
#[derive(Default)]
pub struct FakeStore {
    nodes: Mutex<HashMap<String, Role>>,
    calls: Mutex<Vec<String>>,
    fail_promote: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A master at `addr` with connected replicas at the given offsets.
    pub fn add_group(&self, addr: &str, replicas: &[(&str, u64)]) {
        let mut nodes = self.nodes.lock();
        let listed = replicas
            .iter()
            .map(|(r, offset)| Replica::new(*r, *offset, LinkState::Connected))
            .collect();
        let master_offset = replicas.iter().map(|(_, o)| *o).max().unwrap_or(0);
        nodes.insert(
            addr.to_string(),
            Role::Master {
                offset: master_offset,
                replicas: listed,
            },
        );
        for (r, offset) in replicas {
            nodes.insert(
                r.to_string(),
                Role::Replica {
                    master: addr.to_string(),
                    offset: *offset as i64,
                    state: LinkState::Connected,
                },
            );
        }
    }

    pub fn set_role(&self, addr: &str, role: Role) {
        self.nodes.lock().insert(addr.to_string(), role);
    }

    pub fn kill(&self, addr: &str) {
        self.nodes.lock().remove(addr);
    }

    pub fn role_of(&self, addr: &str) -> Option<Role> {
        self.nodes.lock().get(addr).cloned()
    }

    pub fn fail_promotions(&self) {
        self.fail_promote.store(true, Ordering::SeqCst);
    }

    pub fn allow_promotions(&self) {
        self.fail_promote.store(false, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn role(&self, addr: &str) -> Result<Role> {
        self.nodes
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| Error::ConnectionFailed(format!("{}: connection refused", addr)))
    }

    async fn promote(&self, addr: &str) -> Result<()> {
        self.calls.lock().push(format!("promote {}", addr));
        if self.fail_promote.load(Ordering::SeqCst) {
            return Err(Error::StoreReply("ERR promotion refused".into()));
        }
        let mut nodes = self.nodes.lock();
        let offset = match nodes.get(addr) {
            Some(Role::Replica { offset, .. }) => (*offset).max(0) as u64,
            Some(Role::Master { offset, .. }) => *offset,
            None => return Err(Error::ConnectionFailed(addr.to_string())),
        };
        nodes.insert(
            addr.to_string(),
            Role::Master {
                offset,
                replicas: Vec::new(),
            },
        );
        Ok(())
    }

    async fn replicate_from(&self, addr: &str, master: &str) -> Result<()> {
        self.calls.lock().push(format!("replicate {} {}", addr, master));
        let mut nodes = self.nodes.lock();
        let offset = match nodes.get(addr) {
            Some(Role::Replica { offset, .. }) => *offset,
            Some(Role::Master { offset, .. }) => *offset as i64,
            None => return Err(Error::ConnectionFailed(addr.to_string())),
        };
        nodes.insert(
            addr.to_string(),
            Role::Replica {
                master: master.to_string(),
                offset,
                state: LinkState::Connecting,
            },
        );
        Ok(())
    }
}

/// Consensus stand-in with switchable leadership that applies commands to
/// the state machine immediately.
pub struct FakeConsensus {
    fsm: Arc<dyn StateMachine>,
    leader: watch::Sender<bool>,
    applied: Mutex<Vec<Command>>,
    fail_barrier: AtomicBool,
}

impl FakeConsensus {
    pub fn new(fsm: Arc<dyn StateMachine>, leader: bool) -> Arc<Self> {
        let (tx, _) = watch::channel(leader);
        Arc::new(Self {
            fsm,
            leader: tx,
            applied: Mutex::new(Vec::new()),
            fail_barrier: AtomicBool::new(false),
        })
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.send_replace(leader);
    }

    pub fn fail_barriers(&self) {
        self.fail_barrier.store(true, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<Command> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl Consensus for FakeConsensus {
    fn leader_notifications(&self) -> watch::Receiver<bool> {
        self.leader.subscribe()
    }

    fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    async fn apply(&self, command: Command) -> Result<()> {
        if !self.is_leader() {
            return Err(Error::NotLeader("fake".into()));
        }
        self.applied.lock().push(command.clone());
        self.fsm.apply(&command);
        Ok(())
    }

    async fn barrier(&self, _timeout: Duration) -> Result<()> {
        if self.fail_barrier.load(Ordering::SeqCst) {
            return Err(Error::ConsensusTimeout);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.leader.send_replace(false);
    }
}

/// Fast-ticking config with an ephemeral admin port.
pub fn fast_config(masters: &[&str]) -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        masters: masters.iter().map(|m| m.to_string()).collect(),
        check_interval_ms: 50,
        probe_timeout_ms: 200,
        barrier_timeout_ms: 500,
        ..Default::default()
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

pub fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
