//! Store client: role queries and replication commands against one endpoint.

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::group::{LinkState, Replica};
use super::resp::{self, Value};
use super::split_host_port;
use crate::common::{Error, Result};

/// Role an endpoint reports for itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master {
        offset: u64,
        replicas: Vec<Replica>,
    },
    Replica {
        master: String,
        offset: i64,
        state: LinkState,
    },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Master { .. } => "master",
            Role::Replica { .. } => "slave",
        }
    }
}

/// Operations the failover engine needs from a data-store endpoint.
///
/// Both reconfiguration commands are idempotent: reissuing them against an
/// endpoint that already conforms changes nothing.
#[async_trait]
pub trait Store: Send + Sync {
    async fn role(&self, addr: &str) -> Result<Role>;

    /// Stop replicating and act as an independent master.
    async fn promote(&self, addr: &str) -> Result<()>;

    /// Start (or keep) replicating from `master`.
    async fn replicate_from(&self, addr: &str, master: &str) -> Result<()>;
}

/// Redis endpoint client. Opens one short-lived connection per command.
#[derive(Debug, Clone)]
pub struct RedisStore {
    timeout: Duration,
}

impl RedisStore {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run one command and return its reply; error replies become `Error::StoreReply`.
    pub async fn command(&self, addr: &str, args: &[&str]) -> Result<Value> {
        match tokio::time::timeout(self.timeout, exchange(addr, args)).await {
            Ok(Ok(Value::Error(msg))) => Err(Error::StoreReply(msg)),
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} {} after {:?}",
                addr,
                args.first().unwrap_or(&""),
                self.timeout
            ))),
        }
    }
}

async fn exchange(addr: &str, args: &[&str]) -> Result<Value> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
    stream.set_nodelay(true)?;

    let mut out = BytesMut::new();
    resp::encode_command(args, &mut out);
    stream.write_all(&out).await?;

    let mut buf = BytesMut::with_capacity(512);
    loop {
        if let Some(value) = resp::parse(&mut buf)? {
            return Ok(value);
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::ConnectionFailed(format!(
                "{}: connection closed mid-reply",
                addr
            )));
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn role(&self, addr: &str) -> Result<Role> {
        let reply = self.command(addr, &["ROLE"]).await?;
        parse_role(&reply)
    }

    async fn promote(&self, addr: &str) -> Result<()> {
        self.command(addr, &["SLAVEOF", "NO", "ONE"]).await?;
        Ok(())
    }

    async fn replicate_from(&self, addr: &str, master: &str) -> Result<()> {
        let (host, port) = split_host_port(master)?;
        let port = port.to_string();
        self.command(addr, &["SLAVEOF", host, &port]).await?;
        Ok(())
    }
}

/// Parse a `ROLE` reply.
///
/// Master: `["master", offset, [[ip, port, offset], ...]]`.
/// Replica: `["slave", ip, port, state, offset]`.
pub fn parse_role(reply: &Value) -> Result<Role> {
    let bad = || Error::Protocol(format!("unexpected ROLE reply: {:?}", reply));
    let items = reply.as_array().ok_or_else(bad)?;
    let kind = items.first().and_then(Value::as_str).ok_or_else(bad)?;

    match kind {
        "master" => {
            let offset = items.get(1).and_then(Value::as_i64).ok_or_else(bad)?;
            let mut replicas = Vec::new();
            for entry in items.get(2).and_then(Value::as_array).unwrap_or(&[]) {
                let fields = entry.as_array().ok_or_else(bad)?;
                let ip = fields.first().and_then(Value::as_str).ok_or_else(bad)?;
                let port = fields.get(1).and_then(Value::as_i64).ok_or_else(bad)?;
                let replica_offset = fields.get(2).and_then(Value::as_i64).unwrap_or(0);
                // a master only lists replicas whose link is currently up
                replicas.push(Replica::new(
                    format!("{}:{}", ip, port),
                    replica_offset.max(0) as u64,
                    LinkState::Connected,
                ));
            }
            Ok(Role::Master {
                offset: offset.max(0) as u64,
                replicas,
            })
        }
        "slave" => {
            let ip = items.get(1).and_then(Value::as_str).ok_or_else(bad)?;
            let port = items.get(2).and_then(Value::as_i64).ok_or_else(bad)?;
            let state = items.get(3).and_then(Value::as_str).ok_or_else(bad)?;
            let offset = items.get(4).and_then(Value::as_i64).unwrap_or(-1);
            Ok(Role::Replica {
                master: format!("{}:{}", ip, port),
                offset,
                state: LinkState::from_redis(state),
            })
        }
        other => Err(Error::Protocol(format!("unsupported role {:?}", other))),
    }
}
