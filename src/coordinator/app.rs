//! Coordinator application
//!
//! Composes the store client, consensus membership, masters registry, hook
//! registry, failover executor and health monitor. A leadership watcher
//! starts the monitor (after proposing the seed masters) when this node
//! becomes leader and stops it when leadership is lost.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::failover::FailoverExecutor;
use super::hooks::HookRegistry;
use super::http::{create_router, AdminState};
use super::masters::{MastersRegistry, MastersState};
use super::monitor::{HealthMonitor, MasterHealth};
use crate::common::{Config, Result};
use crate::consensus::{self, Consensus};
use crate::store::{RedisStore, Store};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct App {
    config: Config,
    consensus: Arc<dyn Consensus>,
    registry: Arc<MastersRegistry>,
    hooks: Arc<HookRegistry>,
    monitor: Arc<HealthMonitor>,
    leadership_task: Mutex<Option<JoinHandle<()>>>,
    http_task: Mutex<Option<JoinHandle<()>>>,
    http_stop: Mutex<Option<oneshot::Sender<()>>>,
    http_addr: Mutex<Option<SocketAddr>>,
}

impl App {
    /// Validate `config`, connect the consensus backend and build the app.
    /// Nothing runs until [`App::start`].
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn Store> = Arc::new(RedisStore::new(config.probe_timeout()));
        let state = Arc::new(MastersState::new());
        let consensus = consensus::start(&config, state.clone()).await?;
        Ok(Self::with_parts(config, store, state, consensus))
    }

    /// Build from explicit parts; `state` must be the state machine that
    /// `consensus` applies commands to.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        state: Arc<MastersState>,
        consensus: Arc<dyn Consensus>,
    ) -> Self {
        let registry = Arc::new(MastersRegistry::new(state, consensus.clone()));
        let hooks = Arc::new(HookRegistry::new());
        let executor = Arc::new(FailoverExecutor::new(
            store.clone(),
            registry.clone(),
            hooks.clone(),
            config.barrier_timeout(),
            config.allow_lagging_candidates,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            store,
            registry.clone(),
            hooks.clone(),
            executor,
            config.check_interval(),
            config.failure_threshold,
        ));

        Self {
            config,
            consensus,
            registry,
            hooks,
            monitor,
            leadership_task: Mutex::new(None),
            http_task: Mutex::new(None),
            http_stop: Mutex::new(None),
            http_addr: Mutex::new(None),
        }
    }

    /// Bind the admin API and start following leadership.
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.addr).await?;
        let local = listener.local_addr()?;
        *self.http_addr.lock() = Some(local);

        let router = create_router(AdminState {
            registry: self.registry.clone(),
            monitor: self.monitor.clone(),
            check_interval: self.config.check_interval(),
            barrier_timeout: self.config.barrier_timeout(),
        });
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(e) = server.await {
                tracing::error!("Admin HTTP server error: {}", e);
            }
        });
        *self.http_stop.lock() = Some(stop);
        *self.http_task.lock() = Some(server);
        tracing::info!("Admin API listening on {}", local);

        let watcher = tokio::spawn(follow_leadership(
            self.consensus.leader_notifications(),
            self.registry.clone(),
            self.monitor.clone(),
            self.config.masters.clone(),
        ));
        if let Some(old) = self.leadership_task.lock().replace(watcher) {
            old.abort();
        }
        Ok(())
    }

    /// Stop monitoring, the admin API and the consensus backend.
    pub async fn close(&self) {
        if let Some(task) = self.leadership_task.lock().take() {
            task.abort();
        }
        self.monitor.stop();

        if let Some(stop) = self.http_stop.lock().take() {
            let _ = stop.send(());
        }
        let server = self.http_task.lock().take();
        if let Some(mut server) = server {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                server.abort();
            }
        }

        self.consensus.shutdown().await;
        tracing::info!("Failover coordinator closed");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address the admin API is bound to, once started.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        *self.http_addr.lock()
    }

    pub fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    pub fn leader_notifications(&self) -> watch::Receiver<bool> {
        self.consensus.leader_notifications()
    }

    /// Wait until every mutation this node proposed is visible on a quorum.
    pub async fn barrier(&self, timeout: Duration) -> Result<()> {
        self.registry.barrier(timeout).await
    }

    pub fn get_masters(&self) -> Vec<String> {
        self.registry.get_masters()
    }

    /// Supervise `addrs`; returns once the change is committed.
    pub async fn add_masters(&self, addrs: &[String]) -> Result<()> {
        self.registry.add_masters(addrs).await?;
        self.registry.barrier(self.config.barrier_timeout()).await
    }

    pub async fn remove_masters(&self, addrs: &[String]) -> Result<()> {
        self.registry.remove_masters(addrs).await?;
        self.registry.barrier(self.config.barrier_timeout()).await
    }

    pub fn add_before_failover_handler<F>(&self, handler: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.add_before_failover_handler(handler);
    }

    pub fn add_after_failover_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.add_after_failover_handler(handler);
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    pub fn master_health(&self) -> std::collections::BTreeMap<String, MasterHealth> {
        self.monitor.health()
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(task) = self.leadership_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.http_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn follow_leadership(
    mut leader_rx: watch::Receiver<bool>,
    registry: Arc<MastersRegistry>,
    monitor: Arc<HealthMonitor>,
    seed: Vec<String>,
) {
    loop {
        let leader = *leader_rx.borrow_and_update();
        if leader && !monitor.is_running() {
            tracing::info!("Gained leadership");
            if let Err(e) = registry.seed(&seed).await {
                tracing::warn!(error = %e, "Failed to propose seed masters");
            }
            monitor.start();
        } else if !leader && monitor.is_running() {
            tracing::info!("Lost leadership");
            monitor.stop();
        }

        if leader_rx.changed().await.is_err() {
            break;
        }
    }
    monitor.stop();
}
