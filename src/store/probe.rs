//! Store probe: turn role queries into Group snapshots.

use futures_util::future::join_all;
use std::time::Instant;

use super::client::{Role, Store};
use super::group::{Group, Replica};
use crate::common::{Error, Result, METRICS};

/// Probe `addr` and return its group if it is acting as master.
///
/// An endpoint that answers as a replica counts as a failed probe: the
/// supervised address is no longer the master of its group.
pub async fn probe_group(store: &dyn Store, addr: &str) -> Result<Group> {
    let started = Instant::now();
    let result = match store.role(addr).await {
        Ok(Role::Master { offset, replicas }) => Ok(Group::with_replicas(addr, offset, replicas)),
        Ok(role) => Err(Error::NotPrimary {
            addr: addr.to_string(),
            role: role.name().to_string(),
        }),
        Err(e) => Err(e),
    };
    METRICS.record_probe(addr, started.elapsed(), result.is_ok());
    result
}

/// Re-probe every replica of `group` concurrently and return the reachable
/// ones with their current link state.
///
/// A replica whose master link is down reports offset -1; the offset from
/// the last master snapshot is kept in that case.
pub async fn refresh_replicas(store: &dyn Store, group: &Group) -> Vec<Replica> {
    let probes = group.replicas.iter().map(|replica| async move {
        match store.role(&replica.address).await {
            Ok(Role::Replica { offset, state, .. }) => {
                let offset = if offset > 0 {
                    offset as u64
                } else {
                    replica.offset
                };
                Some(Replica::new(replica.address.clone(), offset, state))
            }
            Ok(Role::Master { offset, .. }) => {
                tracing::warn!(
                    replica = %replica.address,
                    master = %group.master,
                    "replica already reports itself as master"
                );
                Some(Replica::new(replica.address.clone(), offset.max(replica.offset), replica.state))
            }
            Err(e) => {
                tracing::debug!(replica = %replica.address, error = %e, "replica unreachable");
                None
            }
        }
    });

    join_all(probes).await.into_iter().flatten().collect()
}
