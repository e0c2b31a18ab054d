//! Common utilities and types shared across redis-failover

pub mod config;
pub mod error;
pub mod metrics;

pub use config::{ClusterState, Config, RaftConfig};
pub use error::{Error, Result};
pub use metrics::METRICS;
