//! Health monitor
//!
//! Polls every supervised master once per check interval while this node
//! leads. A master that misses `failure_threshold` consecutive probes is
//! declared down; before-hooks and the failover executor then run in a
//! dedicated task. The master is skipped until that task finishes.
//!
//! Before-hooks fire once per outage. If the failover does not commit, the
//! record keeps the last topology snapshot and the executor is retried once
//! the master misses another `failure_threshold` probes. A successful probe
//! ends the outage.

use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use super::failover::{FailoverExecutor, FailoverReport};
use super::hooks::HookRegistry;
use super::masters::MastersRegistry;
use crate::common::{Result, METRICS};
use crate::store::{probe_group, Group, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Suspect,
    Down,
}

/// Per-master view published for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct MasterHealth {
    pub state: HealthState,
    pub failures: u32,
    pub replicas: usize,
    pub failing_over: bool,
}

#[derive(Debug)]
struct Record {
    state: HealthState,
    failures: u32,
    // kept across failed runs so a retry still knows the replicas
    last_group: Option<Group>,
}

impl Record {
    fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            failures: 0,
            last_group: None,
        }
    }
}

struct MonitorContext {
    store: Arc<dyn Store>,
    registry: Arc<MastersRegistry>,
    hooks: Arc<HookRegistry>,
    executor: Arc<FailoverExecutor>,
    interval: Duration,
    failure_threshold: u32,
    health: RwLock<BTreeMap<String, MasterHealth>>,
}

pub struct HealthMonitor {
    ctx: Arc<MonitorContext>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<MastersRegistry>,
        hooks: Arc<HookRegistry>,
        executor: Arc<FailoverExecutor>,
        interval: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            ctx: Arc::new(MonitorContext {
                store,
                registry,
                hooks,
                executor,
                interval,
                failure_threshold: failure_threshold.max(1),
                health: RwLock::new(BTreeMap::new()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the check loop; no-op while it is already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        tracing::info!(interval_ms = self.ctx.interval.as_millis() as u64, "Starting health monitor");
        *task = Some(tokio::spawn(MonitorLoop::new(self.ctx.clone()).run()));
    }

    /// Abort the loop together with any failover it is driving.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("Health monitor stopped");
        }
        self.ctx.health.write().clear();
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |t| !t.is_finished())
    }

    pub fn health(&self) -> BTreeMap<String, MasterHealth> {
        self.ctx.health.read().clone()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

struct MonitorLoop {
    ctx: Arc<MonitorContext>,
    records: HashMap<String, Record>,
    in_flight: HashSet<String>,
    // dropped with the loop, which aborts every handling task
    handling: JoinSet<(String, Option<FailoverReport>)>,
}

impl MonitorLoop {
    fn new(ctx: Arc<MonitorContext>) -> Self {
        Self {
            ctx,
            records: HashMap::new(),
            in_flight: HashSet::new(),
            handling: JoinSet::new(),
        }
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all().await,
                Some(done) = self.handling.join_next() => self.finish(done),
            }
        }
    }

    async fn check_all(&mut self) {
        METRICS.checks_total.inc();
        let masters = self.ctx.registry.get_masters();
        self.records.retain(|addr, _| masters.contains(addr));
        METRICS.retain_masters(&masters);

        let targets: Vec<String> = masters
            .into_iter()
            .filter(|addr| !self.in_flight.contains(addr))
            .collect();
        let store = self.ctx.store.as_ref();
        let results = join_all(targets.iter().map(|addr| probe_group(store, addr))).await;

        for (addr, result) in targets.into_iter().zip(results) {
            self.observe(addr, result);
        }
        self.publish();
    }

    fn observe(&mut self, addr: String, result: Result<Group>) {
        let threshold = self.ctx.failure_threshold;
        let record = self.records.entry(addr.clone()).or_insert_with(Record::new);

        match result {
            Ok(group) => {
                if record.state != HealthState::Healthy {
                    tracing::info!(master = %addr, "Master recovered");
                }
                record.state = HealthState::Healthy;
                record.failures = 0;
                record.last_group = Some(group);
            }
            Err(e) => {
                record.failures += 1;
                let new_outage = record.state != HealthState::Down;
                if record.failures < threshold {
                    if new_outage {
                        record.state = HealthState::Suspect;
                    }
                    tracing::warn!(master = %addr, failures = record.failures, error = %e, "Master probe failed");
                    return;
                }
                if new_outage {
                    tracing::error!(master = %addr, failures = record.failures, error = %e, "Master is down");
                } else {
                    tracing::warn!(master = %addr, error = %e, "Master still down, retrying failover");
                }
                let group = record
                    .last_group
                    .clone()
                    .unwrap_or_else(|| Group::new(addr.clone()));
                self.trigger(addr, group, new_outage);
            }
        }
    }

    fn trigger(&mut self, addr: String, group: Group, new_outage: bool) {
        if !self.ctx.registry.is_leader() {
            tracing::warn!(master = %addr, "Lost leadership, not handling down master");
            return;
        }
        if let Some(record) = self.records.get_mut(&addr) {
            record.state = HealthState::Down;
        }
        if new_outage {
            METRICS.down_detections.inc();
        }
        self.in_flight.insert(addr.clone());

        let hooks = self.ctx.hooks.clone();
        let executor = self.ctx.executor.clone();
        self.handling.spawn(async move {
            let handled = AssertUnwindSafe(async {
                if new_outage {
                    hooks.run_before(&addr);
                }
                executor.run(&group).await
            })
            .catch_unwind()
            .await;
            (addr, handled.ok())
        });
    }

    fn finish(&mut self, done: std::result::Result<(String, Option<FailoverReport>), JoinError>) {
        let (addr, report) = match done {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(error = %e, "Failover task cancelled");
                return;
            }
        };
        self.in_flight.remove(&addr);
        match report {
            Some(report) if report.succeeded() => {
                tracing::debug!(master = %addr, "Down master replaced");
                self.records.remove(&addr);
            }
            Some(report) => {
                tracing::debug!(master = %addr, stage = ?report.failed_at, "Down master not replaced");
                if let Some(record) = self.records.get_mut(&addr) {
                    record.failures = 0;
                }
            }
            None => {
                tracing::error!(master = %addr, "Failover task panicked");
                if let Some(record) = self.records.get_mut(&addr) {
                    record.failures = 0;
                }
            }
        }
        self.publish();
    }

    fn publish(&self) {
        let mut health = BTreeMap::new();
        for (addr, record) in &self.records {
            health.insert(
                addr.clone(),
                MasterHealth {
                    state: record.state,
                    failures: record.failures,
                    replicas: record.last_group.as_ref().map_or(0, |g| g.replicas.len()),
                    failing_over: self.in_flight.contains(addr),
                },
            );
        }
        *self.ctx.health.write() = health;
    }
}
