//! Configuration for redis-failover

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Environment variable prefix for config overrides
/// (e.g. `REDIS_FAILOVER__CHECK_INTERVAL_MS=500`).
pub const ENV_PREFIX: &str = "REDIS_FAILOVER";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address for the admin HTTP API
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// Seed masters to supervise
    #[serde(default)]
    pub masters: Vec<String>,

    /// Health check interval
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Timeout for a single probe or store command
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Consecutive failed probes before a master is declared down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a failover commit waits for cluster-wide visibility
    #[serde(default = "default_barrier_timeout")]
    pub barrier_timeout_ms: u64,

    /// Fall back to replicas with a broken link when no replica is
    /// connected or syncing
    #[serde(default = "default_allow_lagging")]
    pub allow_lagging_candidates: bool,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Raft settings
    #[serde(default)]
    pub raft: RaftConfig,
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 11000))
}
fn default_check_interval() -> u64 {
    1000
}
fn default_probe_timeout() -> u64 {
    1000
}
fn default_failure_threshold() -> u32 {
    1
}
fn default_barrier_timeout() -> u64 {
    5000
}
fn default_allow_lagging() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Whether this node bootstraps a fresh cluster or rejoins with its
/// persisted raft state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    New,
    #[default]
    Existing,
}

/// Raft configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Address the raft transport listens on; must appear in `cluster`
    #[serde(default)]
    pub addr: String,

    /// Directory for the persisted hard state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for the persisted raft log
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Raft addresses of every cluster member; empty runs standalone
    #[serde(default)]
    pub cluster: Vec<String>,

    #[serde(default)]
    pub cluster_state: ClusterState,

    /// Raft logical clock period
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Election timeout, in ticks
    #[serde(default = "default_election_tick")]
    pub election_tick: usize,

    /// Heartbeat interval, in ticks
    #[serde(default = "default_heartbeat_tick")]
    pub heartbeat_tick: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./var/store")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./var/log")
}
fn default_tick_interval() -> u64 {
    100
}
fn default_election_tick() -> usize {
    10
}
fn default_heartbeat_tick() -> usize {
    3
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            cluster: Vec::new(),
            cluster_state: ClusterState::default(),
            tick_interval_ms: default_tick_interval(),
            election_tick: default_election_tick(),
            heartbeat_tick: default_heartbeat_tick(),
        }
    }
}

impl RaftConfig {
    /// Standalone mode: no raft cluster, the local node always leads.
    pub fn is_standalone(&self) -> bool {
        self.cluster.is_empty()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Raft node ids are the 1-based positions in the sorted cluster list,
    /// so every member derives the same ids.
    pub fn peer_ids(&self) -> Vec<(u64, String)> {
        let mut cluster = self.cluster.clone();
        cluster.sort();
        cluster
            .into_iter()
            .enumerate()
            .map(|(i, addr)| (i as u64 + 1, addr))
            .collect()
    }

    pub fn local_id(&self) -> Result<u64> {
        self.peer_ids()
            .into_iter()
            .find(|(_, addr)| *addr == self.addr)
            .map(|(id, _)| id)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("raft addr {} is not in the cluster list", self.addr))
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            masters: Vec::new(),
            check_interval_ms: default_check_interval(),
            probe_timeout_ms: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            barrier_timeout_ms: default_barrier_timeout(),
            allow_lagging_candidates: default_allow_lagging(),
            log_level: default_log_level(),
            raft: RaftConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `REDIS_FAILOVER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("masters")
                    .with_list_parse_key("raft.cluster")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_ms == 0 {
            return Err(Error::InvalidConfig("check_interval_ms must be > 0".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(Error::InvalidConfig("probe_timeout_ms must be > 0".into()));
        }
        if self.failure_threshold == 0 {
            return Err(Error::InvalidConfig("failure_threshold must be > 0".into()));
        }
        if self.barrier_timeout_ms == 0 {
            return Err(Error::InvalidConfig("barrier_timeout_ms must be > 0".into()));
        }
        for master in &self.masters {
            crate::store::split_host_port(master)?;
        }

        if !self.raft.is_standalone() {
            let mut seen = HashSet::new();
            for member in &self.raft.cluster {
                if !seen.insert(member) {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate raft cluster member {}",
                        member
                    )));
                }
            }
            self.raft.local_id()?;
            if self.raft.tick_interval_ms == 0 {
                return Err(Error::InvalidConfig("raft.tick_interval_ms must be > 0".into()));
            }
            if self.raft.heartbeat_tick == 0 || self.raft.election_tick <= self.raft.heartbeat_tick
            {
                return Err(Error::InvalidConfig(
                    "raft.election_tick must be greater than raft.heartbeat_tick".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }
}
