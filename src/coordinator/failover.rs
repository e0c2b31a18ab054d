//! Failover executor
//!
//! Linear recovery workflow for one down master:
//! `Detecting -> SelectingCandidate -> Promoting -> Reconfiguring -> Committing -> Done`,
//! with `Failed` reachable from every step. After-hooks fire only on `Done`.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::hooks::HookRegistry;
use super::masters::MastersRegistry;
use crate::common::{Error, Result, METRICS};
use crate::store::{refresh_replicas, Group, Replica, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStage {
    Detecting,
    SelectingCandidate,
    Promoting,
    Reconfiguring,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for FailoverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailoverStage::Detecting => "detecting",
            FailoverStage::SelectingCandidate => "selecting_candidate",
            FailoverStage::Promoting => "promoting",
            FailoverStage::Reconfiguring => "reconfiguring",
            FailoverStage::Committing => "committing",
            FailoverStage::Done => "done",
            FailoverStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one executor run.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverReport {
    pub old_master: String,
    pub new_master: Option<String>,
    pub stage: FailoverStage,
    /// Step that failed, when `stage` is `Failed`
    pub failed_at: Option<FailoverStage>,
    pub error: Option<String>,
    /// Replicas that could not be pointed at the new master
    pub unreconfigured: Vec<String>,
    pub duration_ms: u64,
}

impl FailoverReport {
    pub fn succeeded(&self) -> bool {
        self.stage == FailoverStage::Done
    }
}

/// Pick the replica to promote.
///
/// Only connected or syncing replicas are considered unless none is, in which
/// case `allow_lagging` widens the pool to every replica. Highest offset wins;
/// ties go to the lowest address.
pub fn select_candidate(replicas: &[Replica], allow_lagging: bool) -> Option<&Replica> {
    let live = replicas
        .iter()
        .filter(|r| r.state.is_live())
        .max_by(|a, b| rank(a, b));
    match live {
        Some(candidate) => Some(candidate),
        None if allow_lagging => replicas.iter().max_by(|a, b| rank(a, b)),
        None => None,
    }
}

fn rank(a: &Replica, b: &Replica) -> Ordering {
    a.offset
        .cmp(&b.offset)
        .then_with(|| b.address.cmp(&a.address))
}

pub struct FailoverExecutor {
    store: Arc<dyn Store>,
    registry: Arc<MastersRegistry>,
    hooks: Arc<HookRegistry>,
    barrier_timeout: Duration,
    allow_lagging: bool,
}

impl FailoverExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<MastersRegistry>,
        hooks: Arc<HookRegistry>,
        barrier_timeout: Duration,
        allow_lagging: bool,
    ) -> Self {
        Self {
            store,
            registry,
            hooks,
            barrier_timeout,
            allow_lagging,
        }
    }

    /// Recover `group`, whose master was declared down. `group` is the last
    /// successful snapshot of the topology.
    pub async fn run(&self, group: &Group) -> FailoverReport {
        let started = Instant::now();
        METRICS.failovers_started.inc();
        tracing::warn!(master = %group.master, replicas = group.replicas.len(), "Starting failover");

        let mut stage = FailoverStage::Detecting;
        let mut unreconfigured = Vec::new();
        let result = self.execute(group, &mut stage, &mut unreconfigured).await;

        let mut report = FailoverReport {
            old_master: group.master.clone(),
            new_master: None,
            stage,
            failed_at: None,
            error: None,
            unreconfigured,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        match result {
            Ok(new_master) => {
                METRICS.failovers_succeeded.inc();
                tracing::info!(
                    old = %group.master,
                    new = %new_master,
                    duration_ms = report.duration_ms,
                    "Failover committed"
                );
                self.hooks.run_after(&group.master, &new_master);
                report.new_master = Some(new_master);
            }
            Err(e) => {
                METRICS.failovers_failed.inc();
                tracing::error!(master = %group.master, stage = %stage, error = %e, "Failover aborted");
                report.stage = FailoverStage::Failed;
                report.failed_at = Some(stage);
                report.error = Some(e.to_string());
            }
        }
        report
    }

    async fn execute(
        &self,
        group: &Group,
        stage: &mut FailoverStage,
        unreconfigured: &mut Vec<String>,
    ) -> Result<String> {
        *stage = FailoverStage::SelectingCandidate;
        if group.replicas.is_empty() {
            return Err(Error::NoCandidate(group.master.clone()));
        }
        let replicas = refresh_replicas(self.store.as_ref(), group).await;
        let candidate = select_candidate(&replicas, self.allow_lagging)
            .ok_or_else(|| Error::NoCandidate(group.master.clone()))?
            .clone();
        tracing::info!(
            master = %group.master,
            candidate = %candidate.address,
            offset = candidate.offset,
            state = %candidate.state,
            "Selected promotion candidate"
        );

        *stage = FailoverStage::Promoting;
        self.ensure_leader()?;
        self.store.promote(&candidate.address).await?;

        *stage = FailoverStage::Reconfiguring;
        // the whole snapshot, so replicas that missed the refresh are retried too
        for replica in &group.replicas {
            if replica.address == candidate.address {
                continue;
            }
            if let Err(e) = self
                .store
                .replicate_from(&replica.address, &candidate.address)
                .await
            {
                tracing::warn!(
                    replica = %replica.address,
                    master = %candidate.address,
                    error = %e,
                    "Failed to reconfigure replica"
                );
                unreconfigured.push(replica.address.clone());
            }
        }

        *stage = FailoverStage::Committing;
        self.ensure_leader()?;
        self.registry.promote(&group.master, &candidate.address).await?;
        self.registry.barrier(self.barrier_timeout).await?;

        *stage = FailoverStage::Done;
        Ok(candidate.address)
    }

    fn ensure_leader(&self) -> Result<()> {
        if self.registry.is_leader() {
            Ok(())
        } else {
            Err(Error::NotLeader("unknown".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LinkState;

    fn replica(addr: &str, offset: u64, state: LinkState) -> Replica {
        Replica::new(addr, offset, state)
    }

    #[test]
    fn highest_offset_wins() {
        let replicas = vec![
            replica("10.0.0.2:6379", 100, LinkState::Connected),
            replica("10.0.0.3:6379", 250, LinkState::Syncing),
            replica("10.0.0.4:6379", 900, LinkState::Disconnected),
        ];
        let chosen = select_candidate(&replicas, true).unwrap();
        assert_eq!(chosen.address, "10.0.0.3:6379");
    }

    #[test]
    fn ties_break_on_lowest_address() {
        let replicas = vec![
            replica("10.0.0.9:6379", 42, LinkState::Connected),
            replica("10.0.0.2:6379", 42, LinkState::Connected),
            replica("10.0.0.5:6379", 42, LinkState::Connected),
        ];
        assert_eq!(select_candidate(&replicas, true).unwrap().address, "10.0.0.2:6379");
    }

    #[test]
    fn lagging_fallback_is_optional() {
        let replicas = vec![
            replica("10.0.0.2:6379", 10, LinkState::Disconnected),
            replica("10.0.0.3:6379", 20, LinkState::Connecting),
        ];
        assert_eq!(select_candidate(&replicas, true).unwrap().address, "10.0.0.3:6379");
        assert!(select_candidate(&replicas, false).is_none());
        assert!(select_candidate(&[], true).is_none());
    }

    #[test]
    fn stage_names() {
        assert_eq!(FailoverStage::SelectingCandidate.to_string(), "selecting_candidate");
        assert_eq!(
            serde_json::to_string(&FailoverStage::Done).unwrap(),
            "\"done\""
        );
    }
}
