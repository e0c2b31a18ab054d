//! Monitored data-store endpoints
//!
//! - Group model of one master and its replicas
//! - RESP codec and a Redis client for role queries and `SLAVEOF`
//! - Probes that turn role replies into group snapshots

pub mod client;
pub mod group;
pub mod probe;
pub mod resp;

pub use client::{RedisStore, Role, Store};
pub use group::{Group, LinkState, Replica};
pub use probe::{probe_group, refresh_replicas};

use crate::common::{Error, Result};

/// Split a `host:port` address; the port must be numeric.
pub fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidConfig(format!("address {} has no port", addr)))?;
    if host.is_empty() {
        return Err(Error::InvalidConfig(format!("address {} has no host", addr)));
    }
    let port = port
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("address {} has an invalid port", addr)))?;
    Ok((host, port))
}
