//! Failover coordinator
//!
//! This module contains:
//! - Masters registry replicated through consensus
//! - Failover hook chains
//! - Health monitor and failover executor
//! - The composed [`App`] and its admin HTTP API

pub mod app;
pub mod failover;
pub mod hooks;
pub mod http;
pub mod masters;
pub mod monitor;

pub use app::App;
pub use failover::{select_candidate, FailoverExecutor, FailoverReport, FailoverStage};
pub use hooks::HookRegistry;
pub use masters::{MastersRegistry, MastersState, Members};
pub use monitor::{HealthMonitor, HealthState, MasterHealth};
