//! # redis-failover
//!
//! Automated failover for Redis master/replica groups with:
//! - Raft consensus so exactly one coordinator acts at a time
//! - A replicated registry of supervised masters
//! - Leader-only health checks and a staged failover executor
//! - Before/after failover hooks for external integrations
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │          Coordinator Cluster              │
//! │   (Raft: masters registry replicated)     │
//! │    - Leader: probes, fails over           │
//! │    - Followers: replicate registry        │
//! └───────────┬───────────────────────────────┘
//!             │ ROLE / SLAVEOF
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ Master A   │   │ Master B   │   │ Master C   │
//! │ + replicas │   │ + replicas │   │ + replicas │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a single coordinator
//! ```bash
//! redis-failover serve \
//!   --addr 127.0.0.1:11000 \
//!   --masters 127.0.0.1:6379,127.0.0.1:6389
//! ```
//!
//! ### Start a three node cluster
//! ```bash
//! redis-failover serve --addr 127.0.0.1:11000 \
//!   --raft-addr 127.0.0.1:12000 \
//!   --raft-cluster 127.0.0.1:12000,127.0.0.1:12001,127.0.0.1:12002 \
//!   --raft-cluster-state new
//! ```
//!
//! ### Embed
//! ```no_run
//! # async fn run() -> redis_failover::Result<()> {
//! let app = redis_failover::App::new(redis_failover::Config::default()).await?;
//! app.add_after_failover_handler(|old, new| {
//!     println!("{} replaced by {}", old, new);
//!     Ok(())
//! });
//! app.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod consensus;
pub mod coordinator;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::App;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
