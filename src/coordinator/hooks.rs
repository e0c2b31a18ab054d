//! Failover hooks
//!
//! Ordered before/after handler chains. Handlers run in registration order;
//! an error is logged and counted but never stops the remaining handlers or
//! the failover itself.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::common::METRICS;

/// Called with the address of a master detected down.
pub type BeforeFailoverHandler = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Called with `(old_master, new_master)` after a promotion is committed.
pub type AfterFailoverHandler = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    before: Mutex<Vec<BeforeFailoverHandler>>,
    after: Mutex<Vec<AfterFailoverHandler>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before_failover_handler<F>(&self, handler: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before.lock().push(Arc::new(handler));
    }

    pub fn add_after_failover_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after.lock().push(Arc::new(handler));
    }

    /// Run every before-handler; returns how many failed.
    pub fn run_before(&self, down_master: &str) -> usize {
        // snapshot so a handler may register further handlers
        let handlers = self.before.lock().clone();
        let mut failed = 0;
        for (i, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler(down_master) {
                failed += 1;
                METRICS.hook_errors.inc();
                tracing::error!(master = %down_master, handler = i, "before-failover handler failed: {:#}", e);
            }
        }
        failed
    }

    /// Run every after-handler; returns how many failed.
    pub fn run_after(&self, old_master: &str, new_master: &str) -> usize {
        let handlers = self.after.lock().clone();
        let mut failed = 0;
        for (i, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler(old_master, new_master) {
                failed += 1;
                METRICS.hook_errors.inc();
                tracing::error!(
                    old = %old_master,
                    new = %new_master,
                    handler = i,
                    "after-failover handler failed: {:#}",
                    e
                );
            }
        }
        failed
    }

    pub fn len(&self) -> (usize, usize) {
        (self.before.lock().len(), self.after.lock().len())
    }
}
