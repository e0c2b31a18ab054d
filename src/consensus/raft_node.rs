//! Raft consensus node
//!
//! Wraps `raft::RawNode` in a single tokio task that owns the node and
//! processes ticks, proposals, barrier markers and inbound peer messages in
//! one loop. Leadership changes are published on a watch channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use raft::prelude::{ConfState, Entry, EntryType, Message};
use raft::storage::MemStorage;
use raft::{RawNode, StateRole};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::storage::RaftLogFile;
use super::transport::{self, PeerTransport};
use super::{Command, Consensus, StateMachine};
use crate::common::{Error, RaftConfig, Result, METRICS};

const INBOX_DEPTH: usize = 4096;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Work items for the raft loop.
pub enum RaftRequest {
    Propose {
        command: Command,
        done: oneshot::Sender<Result<()>>,
    },
    Barrier {
        seq: u64,
        done: oneshot::Sender<Result<()>>,
    },
    Step(Message),
}

pub struct RaftConsensus {
    id: u64,
    inbox: mpsc::Sender<RaftRequest>,
    leader_tx: Arc<watch::Sender<bool>>,
    barrier_seq: AtomicU64,
    transport: Arc<PeerTransport>,
    raft_task: Mutex<Option<JoinHandle<()>>>,
    server_task: Mutex<Option<JoinHandle<()>>>,
    server_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl RaftConsensus {
    /// Recover persisted state, bind the peer listener and start the raft loop.
    pub async fn start(config: &RaftConfig, fsm: Arc<dyn StateMachine>) -> Result<Self> {
        let id = config.local_id()?;
        let members = config.peer_ids();
        let voters: Vec<u64> = members.iter().map(|(id, _)| *id).collect();

        let (log_file, recovered) = RaftLogFile::open(config)?;
        let storage = MemStorage::new_with_conf_state(ConfState::from((voters.clone(), vec![])));
        {
            let mut core = storage.wl();
            for entry in recovered.entries {
                core.append(&[entry])?;
            }
            if let Some(hard_state) = recovered.hard_state {
                core.set_hardstate(hard_state);
            }
        }

        let raft_config = raft::Config {
            id,
            election_tick: config.election_tick,
            heartbeat_tick: config.heartbeat_tick,
            check_quorum: true,
            pre_vote: true,
            max_size_per_msg: 1024 * 1024,
            max_inflight_msgs: 256,
            ..Default::default()
        };
        raft_config.validate()?;

        let logger = raft::default_logger();
        let mut node = RawNode::new(&raft_config, storage.clone(), &logger)?;
        if voters.len() == 1 {
            node.campaign()?;
        }

        let remote: Vec<(u64, String)> = members
            .iter()
            .filter(|(peer, _)| *peer != id)
            .cloned()
            .collect();
        let election_timeout = config.tick_interval() * config.election_tick as u32;
        let transport = Arc::new(PeerTransport::new(remote, election_timeout)?);

        let (inbox, requests) = mpsc::channel(INBOX_DEPTH);
        let (leader_tx, _) = watch::channel(false);
        let leader_tx = Arc::new(leader_tx);

        let listener = TcpListener::bind(&config.addr).await?;
        let (server_stop, stopped) = oneshot::channel::<()>();
        let app = transport::router(inbox.clone());
        let server_task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(e) = server.await {
                tracing::error!("Raft transport server error: {}", e);
            }
        });

        let raft_loop = RaftLoop {
            id,
            node,
            storage,
            log_file,
            fsm,
            transport: transport.clone(),
            requests,
            leader_tx: leader_tx.clone(),
            was_leader: false,
            barriers: HashMap::new(),
            addrs: members.into_iter().collect(),
            tick: config.tick_interval(),
        };
        let raft_task = tokio::spawn(raft_loop.run());

        tracing::info!("Raft node {} listening on {}", id, config.addr);

        Ok(Self {
            id,
            inbox,
            leader_tx,
            barrier_seq: AtomicU64::new(1),
            transport,
            raft_task: Mutex::new(Some(raft_task)),
            server_task: Mutex::new(Some(server_task)),
            server_stop: Mutex::new(Some(server_stop)),
        })
    }

    async fn request(&self, build: impl FnOnce(oneshot::Sender<Result<()>>) -> RaftRequest) -> Result<oneshot::Receiver<Result<()>>> {
        let (done, rx) = oneshot::channel();
        self.inbox
            .send(build(done))
            .await
            .map_err(|_| Error::ConsensusClosed)?;
        Ok(rx)
    }
}

#[async_trait]
impl Consensus for RaftConsensus {
    fn leader_notifications(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    async fn apply(&self, command: Command) -> Result<()> {
        if !self.is_leader() {
            return Err(Error::NotLeader("unknown".to_string()));
        }
        let rx = self
            .request(|done| RaftRequest::Propose { command, done })
            .await?;
        rx.await.map_err(|_| Error::ConsensusClosed)?
    }

    async fn barrier(&self, timeout: Duration) -> Result<()> {
        let seq = self.barrier_seq.fetch_add(1, Ordering::Relaxed);
        let rx = self.request(|done| RaftRequest::Barrier { seq, done }).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConsensusClosed),
            Err(_) => Err(Error::ConsensusTimeout),
        }
    }

    async fn shutdown(&self) {
        if let Some(task) = self.raft_task.lock().take() {
            task.abort();
        }
        self.transport.shutdown();
        self.leader_tx.send_replace(false);

        if let Some(stop) = self.server_stop.lock().take() {
            let _ = stop.send(());
        }
        let server = self.server_task.lock().take();
        if let Some(mut server) = server {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                server.abort();
            }
        }
        tracing::info!("Raft node {} stopped", self.id);
    }
}

impl Drop for RaftConsensus {
    fn drop(&mut self) {
        if let Some(task) = self.raft_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.server_task.get_mut().take() {
            task.abort();
        }
        self.transport.shutdown();
    }
}

struct RaftLoop {
    id: u64,
    node: RawNode<MemStorage>,
    storage: MemStorage,
    log_file: RaftLogFile,
    fsm: Arc<dyn StateMachine>,
    transport: Arc<PeerTransport>,
    requests: mpsc::Receiver<RaftRequest>,
    leader_tx: Arc<watch::Sender<bool>>,
    was_leader: bool,
    /// seq -> (log index of the marker, waiter)
    barriers: HashMap<u64, (u64, oneshot::Sender<Result<()>>)>,
    addrs: HashMap<u64, String>,
    tick: Duration,
}

impl RaftLoop {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.node.tick();
                }
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => break,
                },
            }

            if let Err(e) = self.on_ready() {
                tracing::error!(id = self.id, error = %e, "Raft loop failed, stopping node");
                break;
            }
            self.sync_leadership();
        }

        self.leader_tx.send_replace(false);
        self.fail_barriers();
    }

    fn handle(&mut self, request: RaftRequest) {
        match request {
            RaftRequest::Step(msg) => {
                if let Err(e) = self.node.step(msg) {
                    tracing::debug!(id = self.id, error = %e, "Dropped raft message");
                }
            }
            RaftRequest::Propose { command, done } => {
                let _ = done.send(self.propose(&command));
            }
            RaftRequest::Barrier { seq, done } => {
                let marker = Command::Barrier { node: self.id, seq };
                match self.propose(&marker) {
                    Ok(()) => {
                        let index = self.node.raft.raft_log.last_index();
                        self.barriers.insert(seq, (index, done));
                    }
                    Err(e) => {
                        let _ = done.send(Err(e));
                    }
                }
            }
        }
    }

    fn propose(&mut self, command: &Command) -> Result<()> {
        if self.node.raft.state != StateRole::Leader {
            return Err(Error::NotLeader(self.leader_hint()));
        }
        let data = command.encode()?;
        self.node.propose(vec![], data)?;
        Ok(())
    }

    fn leader_hint(&self) -> String {
        self.addrs
            .get(&self.node.raft.leader_id)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn on_ready(&mut self) -> Result<()> {
        if !self.node.has_ready() {
            return Ok(());
        }
        let mut ready = self.node.ready();

        if !ready.messages().is_empty() {
            self.transport.send(ready.take_messages());
        }

        if !ready.snapshot().is_empty() {
            tracing::warn!(id = self.id, "Applying raft snapshot to storage");
            self.storage.wl().apply_snapshot(ready.snapshot().clone())?;
        }

        self.apply_committed(ready.take_committed_entries());

        if !ready.entries().is_empty() {
            self.log_file.append(ready.entries())?;
            self.storage.wl().append(ready.entries())?;
        }

        if let Some(hard_state) = ready.hs() {
            self.log_file.save_hard_state(hard_state)?;
            self.storage.wl().set_hardstate(hard_state.clone());
        }

        if !ready.persisted_messages().is_empty() {
            self.transport.send(ready.take_persisted_messages());
        }

        let mut light = self.node.advance(ready);
        if let Some(commit) = light.commit_index() {
            let mut core = self.storage.wl();
            core.mut_hard_state().set_commit(commit);
            self.log_file.save_hard_state(core.hard_state())?;
        }
        self.transport.send(light.take_messages());
        self.apply_committed(light.take_committed_entries());
        self.node.advance_apply();
        Ok(())
    }

    fn apply_committed(&mut self, entries: Vec<Entry>) {
        for entry in entries {
            // empty entries are appended by a new leader
            if entry.data.is_empty() || entry.get_entry_type() != EntryType::EntryNormal {
                continue;
            }
            match Command::decode(&entry.data) {
                Ok(Command::Barrier { node, seq }) => {
                    // markers replayed from an earlier run reuse sequence numbers
                    let ours = node == self.id
                        && self
                            .barriers
                            .get(&seq)
                            .map_or(false, |(index, _)| entry.index >= *index);
                    if ours {
                        if let Some((_, done)) = self.barriers.remove(&seq) {
                            let _ = done.send(Ok(()));
                        }
                    }
                }
                Ok(command) => {
                    tracing::debug!(id = self.id, index = entry.index, ?command, "Applying command");
                    self.fsm.apply(&command);
                }
                Err(e) => {
                    tracing::error!(id = self.id, index = entry.index, error = %e, "Undecodable raft entry")
                }
            }
        }
    }

    fn sync_leadership(&mut self) {
        let leader = self.node.raft.state == StateRole::Leader;
        if leader == self.was_leader {
            return;
        }
        self.was_leader = leader;
        tracing::info!(
            id = self.id,
            term = self.node.raft.term,
            leader,
            "Raft leadership changed"
        );
        METRICS.is_leader.set(leader as u64);
        self.leader_tx.send_replace(leader);
        if !leader {
            self.fail_barriers();
        }
    }

    fn fail_barriers(&mut self) {
        let hint = self.leader_hint();
        for (_, (_, done)) in self.barriers.drain() {
            let _ = done.send(Err(Error::NotLeader(hint.clone())));
        }
    }
}
