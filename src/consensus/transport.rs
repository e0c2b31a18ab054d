//! Raft peer transport over HTTP.
//!
//! Outbound messages are protobuf-encoded and POSTed to
//! `http://<peer>/raft/message`. Each peer has a bounded queue drained by one
//! sender task, so a slow or dead peer never blocks the raft loop; messages
//! that do not fit are dropped and raft retransmits them.

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use protobuf::Message as PbMessage;
use raft::prelude::Message;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::raft_node::RaftRequest;
use crate::common::{Error, Result};

const PEER_QUEUE_DEPTH: usize = 1024;

pub struct PeerTransport {
    peers: HashMap<u64, mpsc::Sender<Message>>,
    workers: Vec<JoinHandle<()>>,
}

impl PeerTransport {
    /// Spawn one sender task per remote peer.
    pub fn new(peers: Vec<(u64, String)>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("http client: {}", e)))?;

        let mut senders = HashMap::new();
        let mut workers = Vec::new();
        for (id, addr) in peers {
            let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
            senders.insert(id, tx);
            workers.push(tokio::spawn(send_loop(client.clone(), id, addr, rx)));
        }

        Ok(Self {
            peers: senders,
            workers,
        })
    }

    pub fn send(&self, messages: Vec<Message>) {
        for msg in messages {
            let to = msg.to;
            match self.peers.get(&to) {
                Some(tx) => {
                    if tx.try_send(msg).is_err() {
                        tracing::debug!(peer = to, "Peer queue full, dropping raft message");
                    }
                }
                None => tracing::warn!(peer = to, "Raft message for unknown peer"),
            }
        }
    }

    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn send_loop(client: reqwest::Client, id: u64, addr: String, mut rx: mpsc::Receiver<Message>) {
    let url = format!("http://{}/raft/message", addr);
    while let Some(msg) = rx.recv().await {
        let body = match msg.write_to_bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(peer = id, error = %e, "Failed to encode raft message");
                continue;
            }
        };
        match client.post(&url).body(body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::debug!(peer = id, status = %resp.status(), "Peer rejected raft message");
            }
            Ok(_) => {}
            Err(e) => tracing::trace!(peer = id, error = %e, "Raft message not delivered"),
        }
    }
}

/// Router accepting raft messages from peers.
pub fn router(inbox: mpsc::Sender<RaftRequest>) -> Router {
    Router::new()
        .route("/raft/message", post(receive_message))
        .with_state(inbox)
}

async fn receive_message(State(inbox): State<mpsc::Sender<RaftRequest>>, body: Bytes) -> StatusCode {
    let msg = match Message::parse_from_bytes(&body) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed raft message");
            return StatusCode::BAD_REQUEST;
        }
    };
    match inbox.send(RaftRequest::Step(msg)).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
